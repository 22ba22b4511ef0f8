//! # Audio Pipeline
//!
//! Everything between the microphone/speaker and the transport encoding
//! used by the live voice session.
//!
//! ## Key Components:
//! - **codec**: base64 and PCM16 conversions
//! - **device**: backend traits plus the virtual (hardware-free) backend
//! - **playback**: gapless scheduling of decoded chunks, with interruption
//! - **capture**: microphone frames into the bounded outbound queue
//!
//! ## Audio Format Requirements:
//! - **Capture**: mono, 16 kHz, sent as PCM16 little-endian in base64
//! - **Playback**: mono, 24 kHz, received as PCM16 little-endian in base64

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;

#[cfg(feature = "device-audio")]
pub mod cpal_backend;
