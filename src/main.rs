//! # Culinary Voice Backend - Main Application Entry Point
//!
//! Actix-web server behind a hands-free cooking assistant: it scans fridge
//! photos, generates recipes, walks the cook through steps, keeps a shopping
//! list and runs a realtime voice session that can drive the app.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the HTTP server, the voice session and the remote
//!   clients all run on the tokio runtime
//! - **modules**: one module per concern (see below)
//! - **Result<T, E>**: `anyhow::Result` at the bootstrap level
//! - **static**: a global shutdown flag set from the signal handler
//!
//! ## Application Architecture:
//! - **config**: TOML file + environment configuration
//! - **state**: shared application state and metrics
//! - **health**: health and metrics endpoints
//! - **middleware**: per-endpoint metrics
//! - **handlers**: HTTP API under `/api/v1`
//! - **websocket**: `/ws/events` push channel for the UI
//! - **kitchen**: recipes, cooking session, shopping list
//! - **gemini**: REST client for image, recipe, store and speech calls
//! - **voice**: realtime voice session (protocol, transport, tools)
//! - **audio**: codec, devices, capture and playback scheduling
//! - **events**: broadcast bus of UI events
//! - **error**: error types and HTTP error responses

mod audio;
mod config;
mod error;
mod events;
mod gemini;
mod handlers;
mod health;
mod kitchen;
mod middleware;
mod state;
mod voice;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Creates shared application state** (kitchen store, voice session, clients)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown**, stopping any live voice session first
///
/// ## Flags:
/// - `--print-config`: print a starting `config.toml` and exit
#[actix_web::main]
async fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", AppConfig::sample_toml()?);
        return Ok(());
    }

    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting culinary-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if !config.has_api_key() {
        warn!("No API key configured; scanning, recipes, stores, speech and voice will fail until one is set");
    }

    let app_state = AppState::new(config.clone())?;
    info!(audio_backend = app_state.voice.status().backend, "Audio backend ready");
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let max_upload_bytes = config.performance.max_upload_bytes;

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(web::scope("/api/v1").configure(handlers::configure_api))
            .route("/ws/events", web::get().to(websocket::events_websocket))
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            app_state.voice.shutdown();
            server_handle.stop(true).await;
        }
    }

    // The server may have exited on its own with a session still open.
    app_state.voice.shutdown();
    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "culinary_voice_backend=trace")
/// - If not set, defaults to "culinary_voice_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "culinary_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// ## What this does:
/// - Listens for SIGTERM and SIGINT (Ctrl+C)
/// - When either arrives, sets the global shutdown flag
///
/// If a handler cannot be installed the error is logged and the server keeps
/// running; it can still be stopped by killing the process.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms with an async sleep, so no thread is blocked.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
