//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` / `GEMINI_API_KEY` / `API_KEY` special variables
//! 2. Environment variables (APP_SERVER__PORT, APP_VOICE__MAX_QUEUED_SEGMENTS, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Behaviour instruction sent to the live voice model on every session.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the \"Culinary AI\" voice assistant. You help users navigate the app and control cooking steps. You can navigate between \"scan\", \"recipes\", and \"shopping\" views. When cooking, you can go to the \"next\" step, \"previous\" step, \"repeat\" the current step, or \"finish\". Be helpful, brief, and friendly.";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// The HTTP server, the remote model endpoints and the realtime audio
/// pipeline change for different reasons, so each gets its own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub voice: VoiceConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote model endpoints and model names.
///
/// ## Fields:
/// - `api_key`: Generative Language API key (usually from `GEMINI_API_KEY`)
/// - `base_url`: REST base for `generateContent` calls
/// - `live_endpoint`: websocket URL of the bidirectional streaming service
/// - `*_model`: model used by each collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub live_endpoint: String,
    pub vision_model: String,
    pub recipe_model: String,
    pub maps_model: String,
    pub tts_model: String,
    pub live_model: String,
    pub tts_voice: String,
    pub live_voice: String,
    pub request_timeout_secs: u64,
}

/// Realtime voice pipeline settings.
///
/// ## Audio formats:
/// - Capture: mono PCM16 at `input_sample_rate` (16 kHz on the wire)
/// - Playback: mono PCM16 at `output_sample_rate` (24 kHz from the model)
///
/// ## Queues:
/// - `outbound_queue_capacity`: frames waiting for the network writer; the
///   capture callback drops frames instead of blocking when it is full
/// - `max_queued_segments`: cap on scheduled-but-unfinished playback segments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_frame_samples: usize,
    pub outbound_queue_capacity: usize,
    pub max_queued_segments: usize,
    pub connect_timeout_secs: u64,
    pub system_instruction: String,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Buffered UI events per websocket subscriber before lagging ones skip ahead
    pub event_channel_capacity: usize,
    /// Largest accepted fridge photo upload
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            gemini: GeminiConfig {
                api_key: String::new(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                live_endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                vision_model: "gemini-3-pro-preview".to_string(),
                recipe_model: "gemini-3-pro-preview".to_string(),
                maps_model: "gemini-2.5-flash".to_string(),
                tts_model: "gemini-2.5-flash-preview-tts".to_string(),
                live_model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                tts_voice: "Kore".to_string(),
                live_voice: "Zephyr".to_string(),
                request_timeout_secs: 60,
            },
            voice: VoiceConfig {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                capture_frame_samples: 4096,
                outbound_queue_capacity: 32,
                max_queued_segments: 256,
                connect_timeout_secs: 15,
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            },
            performance: PerformanceConfig {
                event_channel_capacity: 256,
                max_upload_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_VOICE__MAX_QUEUED_SEGMENTS=64`: Tighter playback cap
    /// - `APP_GEMINI__LIVE_ENDPOINT=ws://127.0.0.1:9000/live`: Point at a mock
    /// - `GEMINI_API_KEY=...` (or `API_KEY=...`): Remote API key
    /// - `HOST` / `PORT`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = env::var("GEMINI_API_KEY").ok().or_else(|| env::var("API_KEY").ok()) {
            settings = settings.set_override("gemini.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Both sample rates and the capture frame size are non-zero
    /// - Both voice queues can hold at least one item
    /// - The live endpoint is a websocket URL
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.voice.input_sample_rate == 0 || self.voice.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Voice sample rates must be greater than 0"));
        }

        if self.voice.capture_frame_samples == 0 {
            return Err(anyhow::anyhow!("Capture frame size must be greater than 0"));
        }

        if self.voice.outbound_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Outbound queue capacity must be greater than 0"));
        }

        if self.voice.max_queued_segments == 0 {
            return Err(anyhow::anyhow!("Max queued playback segments must be greater than 0"));
        }

        if !self.gemini.live_endpoint.starts_with("ws://") && !self.gemini.live_endpoint.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Live endpoint must be a ws:// or wss:// URL, got {}",
                self.gemini.live_endpoint
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON change. For example
    /// `{"voice": {"max_queued_segments": 64}}` changes only the playback cap.
    /// The API key is deliberately not updatable at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(gemini) = partial_config.get("gemini") {
            let text_fields: [(&str, &mut String); 6] = [
                ("vision_model", &mut self.gemini.vision_model),
                ("recipe_model", &mut self.gemini.recipe_model),
                ("maps_model", &mut self.gemini.maps_model),
                ("tts_model", &mut self.gemini.tts_model),
                ("live_model", &mut self.gemini.live_model),
                ("live_voice", &mut self.gemini.live_voice),
            ];
            for (key, slot) in text_fields {
                if let Some(value) = gemini.get(key).and_then(|v| v.as_str()) {
                    *slot = value.to_string();
                }
            }
        }

        if let Some(voice) = partial_config.get("voice") {
            if let Some(segments) = voice.get("max_queued_segments").and_then(|v| v.as_u64()) {
                self.voice.max_queued_segments = segments as usize;
            }
            if let Some(capacity) = voice.get("outbound_queue_capacity").and_then(|v| v.as_u64()) {
                self.voice.outbound_queue_capacity = capacity as usize;
            }
            if let Some(instruction) = voice.get("system_instruction").and_then(|v| v.as_str()) {
                self.voice.system_instruction = instruction.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(bytes) = performance.get("max_upload_bytes").and_then(|v| v.as_u64()) {
                self.performance.max_upload_bytes = bytes as usize;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Render the defaults as a commented-free `config.toml` starting point.
    pub fn sample_toml() -> Result<String> {
        let mut defaults = AppConfig::default();
        defaults.gemini.api_key = String::new();
        Ok(toml::to_string_pretty(&defaults)?)
    }

    /// Whether the REST and live collaborators can be reached at all.
    pub fn has_api_key(&self) -> bool {
        !self.gemini.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.voice.input_sample_rate, 16_000);
        assert_eq!(config.voice.output_sample_rate, 24_000);
        assert!(config.validate().is_ok());
        assert!(!config.has_api_key());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.voice.max_queued_segments = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gemini.live_endpoint = "https://example.com/live".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "voice": {"max_queued_segments": 12}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.voice.max_queued_segments, 12);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"voice": {"outbound_queue_capacity": 0}}"#).is_err());
    }

    #[test]
    fn test_sample_toml_round_trips() {
        let rendered = AppConfig::sample_toml().unwrap();
        assert!(rendered.contains("[voice]"));
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.voice.capture_frame_samples, 4096);
        assert_eq!(parsed.gemini.live_voice, "Zephyr");
    }
}
