//! # Capture Pipeline
//!
//! Microphone → PCM16 → base64 → bounded outbound queue.
//!
//! The frame callback runs on the audio thread and must never block, so it
//! uses `try_send`: when the network writer falls behind, frames are dropped
//! and counted instead of stalling the device. Once `stop()` has begun no
//! further frame reaches the queue.

use crate::audio::codec;
use crate::audio::device::Microphone;
use crate::error::VoiceError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// One captured frame, already in transport encoding (base64 PCM16 LE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: String,
    pub sample_rate: u32,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Counters exposed through the voice status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Owns the microphone for the lifetime of one voice session.
pub struct CapturePipeline {
    microphone: Mutex<Option<Box<dyn Microphone>>>,
    sample_rate: u32,
    stopped: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
}

impl CapturePipeline {
    /// Take ownership of an acquired (not yet started) microphone running at `sample_rate`.
    pub fn new(microphone: Box<dyn Microphone>, sample_rate: u32) -> Self {
        Self {
            microphone: Mutex::new(Some(microphone)),
            sample_rate,
            stopped: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Start sampling and forward each frame of `frame_samples` samples to `outbound`.
    ///
    /// The queue item type only needs to be buildable from an [`EncodedFrame`],
    /// which keeps this module independent of the wire protocol.
    pub fn start<T>(&self, frame_samples: usize, outbound: mpsc::Sender<T>) -> Result<(), VoiceError>
    where
        T: From<EncodedFrame> + Send + 'static,
    {
        let mut guard = self.microphone.lock();
        let microphone = match guard.as_mut() {
            Some(mic) if !self.stopped.load(Ordering::SeqCst) => mic,
            _ => return Err(VoiceError::DeviceUnavailable("capture has already been stopped".to_string())),
        };

        let stopped = self.stopped.clone();
        let counters = self.counters.clone();
        let sample_rate = self.sample_rate;
        microphone.start(
            frame_samples,
            Box::new(move |frame: &[f32]| {
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let item = T::from(EncodedFrame {
                    data: codec::encode_frame(frame),
                    sample_rate,
                });
                match outbound.try_send(item) {
                    Ok(()) => {
                        counters.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        // Log on powers of two so a stalled writer doesn't flood the log.
                        if dropped.is_power_of_two() {
                            warn!(dropped_total = dropped, "Outbound audio queue full, dropping capture frame");
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }),
        )?;

        info!(frame_samples, "Audio capture started");
        Ok(())
    }

    /// Tear down the microphone. Safe to call any number of times.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut microphone) = self.microphone.lock().take() {
            microphone.stop();
        }
        let stats = self.stats();
        debug!(
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            "Audio capture stopped"
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
