//! # Realtime Voice Core
//!
//! - **protocol**: JSON messages exchanged with the streaming voice service
//! - **transport**: websocket connect, setup handshake and the outbound writer
//! - **tools**: the two voice commands and how they change the view state
//! - **session**: the controller tying devices, transport and tools together

pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;

pub use session::{SessionSettings, SessionState, SessionStatus, VoiceSession};
