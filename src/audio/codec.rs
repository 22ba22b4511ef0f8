//! # Audio Codec Utility
//!
//! Conversions between the three representations audio takes on its way
//! through the voice pipeline:
//!
//! - **f32 samples** in `[-1.0, 1.0)`: what microphones deliver and what
//!   output devices consume
//! - **PCM16** (`i16`, little-endian on the wire): what the live service speaks
//! - **base64 text**: how PCM16 bytes travel inside JSON messages
//!
//! ## Quantisation:
//! `float_to_pcm` multiplies by 32768 and truncates toward zero. There is no
//! clamp and no dither, so values at or beyond full scale wrap around
//! (`1.0 → -32768`, `1.5 → -16384`). Microphone input never reaches 1.0 in
//! practice and the wire format expects exactly this conversion.

use crate::error::VoiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use byteorder::{ByteOrder, LittleEndian};

/// Full-scale divisor shared by both conversion directions.
const PCM_SCALE: f32 = 32768.0;

/// Encode raw bytes as standard (padded) base64.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 back into bytes.
///
/// ## Errors:
/// Returns `VoiceError::DecodeError` for any input that is not valid base64
/// (bad alphabet, wrong padding, truncated quantum).
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>, VoiceError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| VoiceError::DecodeError(format!("invalid base64 payload: {}", e)))
}

/// Quantise float samples to PCM16.
///
/// The multiply happens in f32, the result is truncated to i32 and then
/// narrowed to i16. The narrowing cast is what produces the wraparound for
/// out-of-range input.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&x| (x * PCM_SCALE) as i32 as i16)
        .collect()
}

/// Expand PCM16 samples to floats in `[-1.0, 1.0)`.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM_SCALE).collect()
}

/// Pack PCM16 samples as little-endian bytes.
pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

/// Unpack little-endian bytes into PCM16 samples.
///
/// ## Errors:
/// An odd byte count cannot hold whole 16-bit samples and is rejected with
/// `VoiceError::DecodeError` rather than silently dropping the last byte.
pub fn bytes_to_pcm(bytes: &[u8]) -> Result<Vec<i16>, VoiceError> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::DecodeError(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut samples);
    Ok(samples)
}

/// Capture direction in one step: floats → PCM16 → LE bytes → base64.
pub fn encode_frame(samples: &[f32]) -> String {
    bytes_to_text(&pcm_to_bytes(&float_to_pcm(samples)))
}

/// Playback direction in one step: base64 → LE bytes → PCM16 → floats.
pub fn decode_chunk(text: &str) -> Result<Vec<f32>, VoiceError> {
    let bytes = text_to_bytes(text)?;
    let pcm = bytes_to_pcm(&bytes)?;
    Ok(pcm_to_float(&pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let cases: [&[u8]; 4] = [b"", b"\x00", b"\xff\x00\x7f", &[0u8, 1, 2, 3, 254, 255, 128, 64]];
        for bytes in cases {
            assert_eq!(text_to_bytes(&bytes_to_text(bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let err = text_to_bytes("not*base64!").unwrap_err();
        assert_eq!(err.kind(), "decode_error");
    }

    #[test]
    fn test_float_to_pcm_wraps_out_of_range() {
        assert_eq!(float_to_pcm(&[1.0]), vec![-32768]);
        assert_eq!(float_to_pcm(&[1.5]), vec![-16384]);
        assert_eq!(float_to_pcm(&[-1.0]), vec![-32768]);
        assert_eq!(float_to_pcm(&[0.0, 0.5, -0.5]), vec![0, 16384, -16384]);
    }

    #[test]
    fn test_quantisation_error_is_bounded() {
        let step = 1.0 / 32768.0;
        let inputs: Vec<f32> = (0..2000).map(|i| -1.0 + i as f32 * 0.000999).collect();
        let restored = pcm_to_float(&float_to_pcm(&inputs));
        for (x, y) in inputs.iter().zip(restored.iter()) {
            assert!((x - y).abs() <= step, "{} -> {}", x, y);
        }
    }

    #[test]
    fn test_pcm_byte_packing_is_little_endian() {
        let bytes = pcm_to_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff, 0x34, 0x12]);
        assert_eq!(bytes_to_pcm(&bytes).unwrap(), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_odd_length_pcm_is_rejected() {
        assert!(matches!(bytes_to_pcm(&[0, 1, 2]), Err(VoiceError::DecodeError(_))));
    }

    #[test]
    fn test_frame_helpers_agree() {
        let frame = [0.25f32, -0.25, 0.0];
        let decoded = decode_chunk(&encode_frame(&frame)).unwrap();
        assert_eq!(decoded, vec![0.25, -0.25, 0.0]);
    }
}
