//! # Playback Scheduler
//!
//! Turns a stream of decoded audio chunks into gapless, non-overlapping
//! playback on an [`OutputDevice`].
//!
//! ## Scheduling rule:
//! Each segment starts at `max(next_start_offset, device.current_time())`
//! and pushes `next_start_offset` to its own end. Chunks that arrive while
//! audio is still playing queue up back to back; a chunk arriving after a
//! silence starts immediately instead of "in the past".
//!
//! ## Thread Safety:
//! `next_start_offset` and the active set sit behind one mutex, so an
//! `enqueue` racing an `interrupt` sees either the state before or after the
//! interrupt, never a mix. Completion callbacks hold only a `Weak` reference
//! and take the same lock to remove their segment.

use crate::audio::device::{OutputDevice, SourceId};
use crate::error::VoiceError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Where a segment landed on the device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub start_at: f64,
    pub duration: f64,
}

/// Result of handing a chunk to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Enqueued {
    Scheduled(ScheduledSegment),
    /// The active set was at its cap; the chunk was discarded
    Dropped,
}

#[derive(Debug)]
struct ActiveSegment {
    source_id: SourceId,
    segment: ScheduledSegment,
}

#[derive(Debug, Default)]
struct PlaybackState {
    next_start_offset: f64,
    next_key: u64,
    active: HashMap<u64, ActiveSegment>,
}

struct SchedulerInner {
    device: Arc<dyn OutputDevice>,
    max_queued_segments: usize,
    state: Mutex<PlaybackState>,
    dropped: AtomicU64,
}

/// Owns every segment from enqueue until it ends or is interrupted.
///
/// Cloning is cheap and every clone drives the same schedule.
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<SchedulerInner>,
}

impl PlaybackScheduler {
    /// Create a scheduler over `device`, holding at most `max_queued_segments`
    /// scheduled-but-unfinished segments.
    pub fn new(device: Arc<dyn OutputDevice>, max_queued_segments: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                device,
                max_queued_segments: max_queued_segments.max(1),
                state: Mutex::new(PlaybackState::default()),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule decoded samples right after everything already queued.
    ///
    /// ## Errors:
    /// `PlaybackError` when the output device is closed. State is left
    /// untouched in that case.
    pub fn enqueue(&self, samples: Vec<f32>) -> Result<Enqueued, VoiceError> {
        let device = &self.inner.device;
        if device.is_closed() {
            return Err(VoiceError::PlaybackError("output device is closed".to_string()));
        }

        let mut state = self.inner.state.lock();
        if state.active.len() >= self.inner.max_queued_segments {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                active = state.active.len(),
                cap = self.inner.max_queued_segments,
                dropped_total = dropped,
                "Playback queue full, dropping audio segment"
            );
            return Ok(Enqueued::Dropped);
        }

        let duration = samples.len() as f64 / device.sample_rate().max(1) as f64;
        let start_at = state.next_start_offset.max(device.current_time());

        state.next_key += 1;
        let key = state.next_key;
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let source_id = device.schedule(
            samples,
            start_at,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.state.lock().active.remove(&key);
                }
            }),
        )?;

        let segment = ScheduledSegment { start_at, duration };
        state.next_start_offset = start_at + duration;
        state.active.insert(key, ActiveSegment { source_id, segment });
        debug!(start_at, duration, active = state.active.len(), "Audio segment scheduled");

        Ok(Enqueued::Scheduled(segment))
    }

    /// Stop everything that is playing or queued and rewind the schedule.
    ///
    /// After this returns the active set is empty and the next segment starts
    /// at the device's current time.
    pub fn interrupt(&self) {
        let mut state = self.inner.state.lock();
        let stopped = state.active.len();
        for (_, active) in state.active.drain() {
            self.inner.device.stop_source(active.source_id);
        }
        state.next_start_offset = 0.0;
        if stopped > 0 {
            debug!(stopped, "Playback interrupted");
        }
    }

    /// Interrupt and close the output device.
    pub fn shutdown(&self) {
        self.interrupt();
        self.inner.device.close();
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    pub fn next_start_offset(&self) -> f64 {
        self.inner.state.lock().next_start_offset
    }

    /// Segments discarded because the cap was reached.
    pub fn dropped_segments(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn device(&self) -> &Arc<dyn OutputDevice> {
        &self.inner.device
    }
}
