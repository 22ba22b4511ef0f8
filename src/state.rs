//! # Application State Management
//!
//! Shared state handed to every HTTP handler and websocket actor through
//! `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every request gets a cheap clone of `AppState`; the clones point at the
//!   same kitchen store, voice session and metrics.
//!
//! ### RwLock (parking_lot)
//! - Multiple readers OR one writer, like the std lock
//! - No poisoning: a panicking handler cannot wedge the config or metrics, so
//!   there is no `unwrap()` on lock acquisition
//!
//! ## What lives here:
//! - **config**: runtime-updatable configuration
//! - **metrics**: request/error counters and per-endpoint timings
//! - **kitchen**: recipes, cooking session and shopping list
//! - **voice**: the single realtime voice session controller
//! - **events**: broadcast bus feeding `/ws/events`
//! - **gemini**: REST client for the remote collaborators

use crate::audio::device::{self, AudioBackend};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::gemini::GeminiClient;
use crate::kitchen::KitchenStore;
use crate::voice::{SessionSettings, VoiceSession};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning copies the `Arc` pointers, not the data
/// - **Arc<KitchenStore>**: the store is shared with the voice session, which
///   sees it only as a `ViewStateAccess` trait object
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub kitchen: Arc<KitchenStore>,
    pub voice: VoiceSession,
    pub events: EventBus,
    pub gemini: GeminiClient,
    /// When the server started (never changes)
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability
/// - **voice_sessions_started**: how often the voice assistant is used
/// - **event_subscribers**: UI clients currently attached to `/ws/events`
/// - **endpoint_metrics**: per-route timings keyed like `"GET /api/v1/kitchen"`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub voice_sessions_started: u64,
    pub event_subscribers: u32,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state with the platform's default audio backend.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        Self::with_backend(config, device::default_backend())
    }

    /// Build the state around an explicit audio backend.
    ///
    /// ## Wiring:
    /// 1. One `EventBus` shared by the kitchen store and the voice session
    /// 2. The kitchen store, handed to the voice session as its view state
    /// 3. The voice session with settings captured from `config`
    pub fn with_backend(config: AppConfig, backend: Arc<dyn AudioBackend>) -> anyhow::Result<Self> {
        let events = EventBus::new(config.performance.event_channel_capacity);
        let kitchen = Arc::new(KitchenStore::new(events.clone()));
        let voice = VoiceSession::new(
            SessionSettings::from_config(&config),
            backend,
            kitchen.clone(),
            events.clone(),
        );
        let gemini = GeminiClient::new(config.gemini.clone())?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            kitchen,
            voice,
            events,
            gemini,
            start_time: Instant::now(),
        })
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Validate and install a new configuration.
    ///
    /// Model names and the API key reach the REST client right away. Voice
    /// settings apply from the next voice session; a running one is left
    /// alone.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        self.gemini.update_config(new_config.gemini.clone());
        self.voice.update_settings(SessionSettings::from_config(&new_config));
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record timing and outcome for one request to `endpoint`.
    ///
    /// ## Rust Concepts:
    /// - **.entry()**: Gets or creates a HashMap entry
    /// - **.or_default()**: Creates default value if the key doesn't exist
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_voice_session_started(&self) {
        self.metrics.write().voice_sessions_started += 1;
    }

    pub fn increment_event_subscribers(&self) {
        self.metrics.write().event_subscribers += 1;
    }

    /// Saturates at zero.
    pub fn decrement_event_subscribers(&self) {
        let mut metrics = self.metrics.write();
        metrics.event_subscribers = metrics.event_subscribers.saturating_sub(1);
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds, 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::device::VirtualBackend;

    /// State over a manual-clock virtual backend, for handler tests.
    pub(crate) fn test_state() -> (AppState, VirtualBackend) {
        let backend = VirtualBackend::manual();
        let state = AppState::with_backend(AppConfig::default(), Arc::new(backend.clone())).unwrap();
        (state, backend)
    }

    #[test]
    fn test_endpoint_metrics() {
        let (state, _) = test_state();
        state.record_endpoint_request("GET /api/v1/kitchen", 10, false);
        state.record_endpoint_request("GET /api/v1/kitchen", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /api/v1/kitchen"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().average_duration_ms(), 0.0);
    }

    #[test]
    fn test_event_subscribers_saturate() {
        let (state, _) = test_state();
        state.decrement_event_subscribers();
        state.increment_event_subscribers();
        assert_eq!(state.get_metrics_snapshot().event_subscribers, 1);
        state.decrement_event_subscribers();
        state.decrement_event_subscribers();
        assert_eq!(state.get_metrics_snapshot().event_subscribers, 0);
    }

    #[test]
    fn test_update_config_validates() {
        let (state, _) = test_state();
        let mut config = state.get_config();
        config.voice.max_queued_segments = 0;
        assert!(state.update_config(config).is_err());

        let mut config = state.get_config();
        config.gemini.maps_model = "gemini-x".to_string();
        assert!(state.update_config(config).is_ok());
        assert_eq!(state.get_config().gemini.maps_model, "gemini-x");
    }
}
