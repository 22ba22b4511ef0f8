//! Runtime configuration endpoints.
//!
//! ## Endpoints:
//! - `GET /config`: current configuration, API key redacted
//! - `PUT /config`: partial update, validated before it is applied

use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. The API key itself never leaves the server.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "gemini": {
            "api_key_configured": config.has_api_key(),
            "base_url": config.gemini.base_url,
            "live_endpoint": config.gemini.live_endpoint,
            "vision_model": config.gemini.vision_model,
            "recipe_model": config.gemini.recipe_model,
            "maps_model": config.gemini.maps_model,
            "tts_model": config.gemini.tts_model,
            "live_model": config.gemini.live_model,
            "tts_voice": config.gemini.tts_voice,
            "live_voice": config.gemini.live_voice,
            "request_timeout_secs": config.gemini.request_timeout_secs
        },
        "voice": {
            "input_sample_rate": config.voice.input_sample_rate,
            "output_sample_rate": config.voice.output_sample_rate,
            "capture_frame_samples": config.voice.capture_frame_samples,
            "outbound_queue_capacity": config.voice.outbound_queue_capacity,
            "max_queued_segments": config.voice.max_queued_segments,
            "connect_timeout_secs": config.voice.connect_timeout_secs,
            "system_instruction": config.voice.system_instruction
        },
        "performance": {
            "event_channel_capacity": config.performance.event_channel_capacity,
            "max_upload_bytes": config.performance.max_upload_bytes
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}
