//! # Remote Collaborators
//!
//! Image analysis, recipe generation, store lookup and speech synthesis over
//! the Generative Language REST API.

pub mod client;

pub use client::{GeminiClient, SpeechAudio};
