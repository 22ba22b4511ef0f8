//! Health and metrics endpoints.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let voice = state.voice.status();
    let kitchen = state.kitchen.snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "culinary-voice-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "event_subscribers": metrics.event_subscribers
        },
        "memory": get_memory_info(),
        "voice": {
            "state": voice.state,
            "active": voice.active,
            "audio_backend": voice.backend,
            "live_model": config.gemini.live_model,
            "last_error": voice.last_error
        },
        "kitchen": {
            "view": kitchen.view,
            "ingredients": kitchen.ingredients.len(),
            "recipes": kitchen.recipes.len(),
            "shopping_items": kitchen.shopping_list.len()
        },
        "collaborators": {
            "api_key_configured": config.has_api_key(),
            "vision_model": config.gemini.vision_model,
            "recipe_model": config.gemini.recipe_model,
            "maps_model": config.gemini.maps_model,
            "tts_model": config.gemini.tts_model
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let voice = state.voice.status();
    let config = state.get_config();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "event_subscribers": metrics.event_subscribers,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "voice": {
            "sessions_started": metrics.voice_sessions_started,
            "state": voice.state,
            "capture": voice.capture,
            "queued_segments": voice.queued_segments,
            "dropped_segments": voice.dropped_segments,
            "max_queued_segments": config.voice.max_queued_segments,
            "outbound_queue_capacity": config.voice.outbound_queue_capacity
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    vm_rss = parse_kb(rest);
                } else if let Some(rest) = line.strip_prefix("VmSize:") {
                    vm_size = parse_kb(rest);
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "pid": pid,
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// `"   1234 kB"` → bytes.
fn parse_kb(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .unwrap_or(0)
        * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;

    #[test]
    fn test_parse_kb() {
        assert_eq!(parse_kb("   2048 kB"), 2048 * 1024);
        assert_eq!(parse_kb(""), 0);
    }

    #[actix_web::test]
    async fn test_health_reports_voice_and_kitchen() {
        let (state, _backend) = test_state();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["voice"]["state"], "idle");
        assert_eq!(body["voice"]["active"], false);
        assert_eq!(body["kitchen"]["view"], "scan");
        assert_eq!(body["collaborators"]["api_key_configured"], false);
    }
}
