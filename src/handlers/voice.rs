//! # Voice Assistant Endpoints
//!
//! - `POST /voice/start`: acquire devices, connect and start streaming
//! - `POST /voice/stop`: tear the session down (idempotent)
//! - `GET /voice/status`: current state and counters
//!
//! `start` waits for the setup exchange to finish, so a `200` means the
//! session is live. Failures come back with the voice error `type`
//! (`permission_denied`, `connection_failed`, `already_active`, ...).

use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn start_voice(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let status = state.voice.start().await?;
    state.record_voice_session_started();
    info!(session_id = ?status.session_id, "Voice assistant started via API");
    Ok(HttpResponse::Ok().json(status))
}

pub async fn stop_voice(state: web::Data<AppState>) -> HttpResponse {
    let stopped = state.voice.stop();
    HttpResponse::Ok().json(json!({
        "stopped": stopped,
        "status": state.voice.status()
    }))
}

pub async fn voice_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.voice.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure_api;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_denied_microphone_maps_to_forbidden() {
        let (state, backend) = test_state();
        backend.deny_microphone(true);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(web::scope("/api/v1").configure(configure_api)),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/voice/start").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "permission_denied");
        assert_eq!(backend.open_handles(), 0);

        let req = test::TestRequest::get().uri("/api/v1/voice/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "idle");
        assert_eq!(body["active"], false);
        assert!(body["last_error"].is_string());

        let req = test::TestRequest::post().uri("/api/v1/voice/stop").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stopped"], false);
        assert_eq!(state.get_metrics_snapshot().voice_sessions_started, 0);
    }
}
