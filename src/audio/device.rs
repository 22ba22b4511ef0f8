//! # Audio Devices
//!
//! The voice pipeline never touches hardware directly. It talks to three
//! small traits:
//!
//! - **AudioBackend**: factory for microphones and output devices
//! - **Microphone**: pushes fixed-size frames of f32 samples to a callback
//! - **OutputDevice**: a clock plus "play these samples starting at time t"
//!
//! Two backends implement them:
//!
//! - [`VirtualBackend`]: no hardware. The clock is either driven by tests
//!   (`advance`) or by the wall clock, and the microphone is either fed by
//!   tests (`feed_microphone`) or produces silence in real time.
//! - `CpalBackend` (feature `device-audio`): real devices through cpal.
//!
//! ## Completion callbacks:
//! A scheduled source fires its `on_ended` callback once it has played to the
//! end. Sources removed through `stop_source` or `close` never fire. Backends
//! always invoke callbacks outside their own locks, so a callback may call
//! back into the device.

use crate::error::VoiceError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Handle returned by [`OutputDevice::schedule`].
pub type SourceId = u64;

/// Receives one full capture frame at a time.
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Runs once when a scheduled source has finished playing.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Factory for the two device contexts a voice session needs.
pub trait AudioBackend: Send + Sync {
    /// Short name for logs and the status endpoint.
    fn name(&self) -> &'static str;

    /// Acquire the microphone at the given sample rate.
    ///
    /// ## Errors:
    /// - `PermissionDenied` when access is refused
    /// - `DeviceUnavailable` when no usable input exists
    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn Microphone>, VoiceError>;

    /// Create an output context at the given sample rate.
    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>, VoiceError>;
}

/// A live microphone.
pub trait Microphone: Send {
    /// Begin sampling. `on_frame` receives exactly `frame_samples` samples per call.
    fn start(&mut self, frame_samples: usize, on_frame: FrameCallback) -> Result<(), VoiceError>;

    /// Stop sampling and release the device. Calling it again does nothing.
    fn stop(&mut self);
}

/// A scheduling audio output.
pub trait OutputDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Seconds since the context was created, advancing as audio plays.
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `start_at` seconds on this device's clock.
    ///
    /// ## Errors:
    /// `PlaybackError` once the device has been closed.
    fn schedule(&self, samples: Vec<f32>, start_at: f64, on_ended: EndedCallback) -> Result<SourceId, VoiceError>;

    /// Cancel a source. Unknown or finished ids are ignored.
    fn stop_source(&self, id: SourceId);

    /// Close the context, dropping every pending source. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Pick the backend for this build.
pub fn default_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "device-audio")]
    {
        Arc::new(crate::audio::cpal_backend::CpalBackend::new())
    }
    #[cfg(not(feature = "device-audio"))]
    {
        Arc::new(VirtualBackend::wall_clock())
    }
}

/// How the virtual clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Only `VirtualBackend::advance` moves time
    Manual,
    /// Real time since the backend was created
    Wall,
}

struct VirtualClock {
    mode: ClockMode,
    manual_now: Mutex<f64>,
    origin: Instant,
}

impl VirtualClock {
    fn now(&self) -> f64 {
        match self.mode {
            ClockMode::Manual => *self.manual_now.lock(),
            ClockMode::Wall => self.origin.elapsed().as_secs_f64(),
        }
    }
}

struct MicTap {
    frame_samples: usize,
    pending: Vec<f32>,
    on_frame: FrameCallback,
}

#[derive(Default)]
struct MicState {
    next_id: u64,
    taps: HashMap<u64, MicTap>,
}

struct VirtualShared {
    clock: VirtualClock,
    deny_microphone: AtomicBool,
    fail_output: AtomicBool,
    open_handles: AtomicUsize,
    mic: Mutex<MicState>,
    outputs: Mutex<Vec<Weak<VirtualOutput>>>,
}

impl VirtualShared {
    /// Push samples into one tap (or every tap when `only` is None), emitting full frames.
    fn deliver(&self, only: Option<u64>, samples: &[f32]) {
        let mut mic = self.mic.lock();
        for (id, tap) in mic.taps.iter_mut() {
            if only.is_some_and(|wanted| wanted != *id) {
                continue;
            }
            tap.pending.extend_from_slice(samples);
            while tap.pending.len() >= tap.frame_samples {
                let frame: Vec<f32> = tap.pending.drain(..tap.frame_samples).collect();
                (tap.on_frame)(&frame);
            }
        }
    }
}

/// Hardware-free backend.
///
/// ## Usage in tests:
/// ```rust
/// let backend = VirtualBackend::manual();
/// let output = backend.open_output(24_000)?;
/// output.schedule(vec![0.0; 48_000], 0.0, Box::new(|| {}))?;
/// backend.advance(2.0); // fires the completion
/// ```
#[derive(Clone)]
pub struct VirtualBackend {
    shared: Arc<VirtualShared>,
}

impl VirtualBackend {
    fn with_mode(mode: ClockMode) -> Self {
        Self {
            shared: Arc::new(VirtualShared {
                clock: VirtualClock {
                    mode,
                    manual_now: Mutex::new(0.0),
                    origin: Instant::now(),
                },
                deny_microphone: AtomicBool::new(false),
                fail_output: AtomicBool::new(false),
                open_handles: AtomicUsize::new(0),
                mic: Mutex::new(MicState::default()),
                outputs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Test clock: time only moves through [`advance`](Self::advance).
    pub fn manual() -> Self {
        Self::with_mode(ClockMode::Manual)
    }

    /// Real-time clock with a microphone that emits silence.
    pub fn wall_clock() -> Self {
        Self::with_mode(ClockMode::Wall)
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.shared.clock.mode
    }

    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    /// Move the manual clock forward and fire every completion that became due.
    pub fn advance(&self, seconds: f64) {
        if self.shared.clock.mode == ClockMode::Manual {
            *self.shared.clock.manual_now.lock() += seconds;
        }
        let outputs: Vec<Arc<VirtualOutput>> = {
            let mut outputs = self.shared.outputs.lock();
            outputs.retain(|weak| weak.strong_count() > 0);
            outputs.iter().filter_map(Weak::upgrade).collect()
        };
        for output in outputs {
            output.fire_due();
        }
    }

    /// Close every open output, as if the speaker went away.
    pub fn disconnect_outputs(&self) {
        let outputs: Vec<Arc<VirtualOutput>> = self.shared.outputs.lock().iter().filter_map(Weak::upgrade).collect();
        for output in outputs {
            output.close();
        }
    }

    /// Feed samples to every running microphone.
    pub fn feed_microphone(&self, samples: &[f32]) {
        self.shared.deliver(None, samples);
    }

    /// Make the next `open_microphone` calls fail with `PermissionDenied`.
    pub fn deny_microphone(&self, deny: bool) {
        self.shared.deny_microphone.store(deny, Ordering::SeqCst);
    }

    /// Make the next `open_output` calls fail with `DeviceUnavailable`.
    pub fn fail_output(&self, fail: bool) {
        self.shared.fail_output.store(fail, Ordering::SeqCst);
    }

    /// Microphones not yet stopped plus outputs not yet closed.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Number of microphones currently delivering frames.
    pub fn running_microphones(&self) -> usize {
        self.shared.mic.lock().taps.len()
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn Microphone>, VoiceError> {
        if self.shared.deny_microphone.load(Ordering::SeqCst) {
            return Err(VoiceError::PermissionDenied("microphone access was refused".to_string()));
        }
        let id = {
            let mut mic = self.shared.mic.lock();
            mic.next_id += 1;
            mic.next_id
        };
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        debug!(microphone_id = id, sample_rate, "Virtual microphone opened");
        Ok(Box::new(VirtualMicrophone {
            id,
            sample_rate,
            shared: self.shared.clone(),
            silence_thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            released: false,
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>, VoiceError> {
        if self.shared.fail_output.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceUnavailable("no output device available".to_string()));
        }
        let output = Arc::new(VirtualOutput {
            sample_rate,
            shared: self.shared.clone(),
            state: Mutex::new(VirtualOutputState::default()),
        });
        self.shared.outputs.lock().push(Arc::downgrade(&output));
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);

        if self.shared.clock.mode == ClockMode::Wall {
            let weak = Arc::downgrade(&output);
            thread::Builder::new()
                .name("virtual-output-clock".to_string())
                .spawn(move || loop {
                    thread::sleep(Duration::from_millis(10));
                    match weak.upgrade() {
                        Some(output) if !output.is_closed() => output.fire_due(),
                        _ => break,
                    }
                })
                .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to start output clock: {}", e)))?;
        }

        debug!(sample_rate, "Virtual output opened");
        Ok(output)
    }
}

struct VirtualMicrophone {
    id: u64,
    sample_rate: u32,
    shared: Arc<VirtualShared>,
    silence_thread: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    released: bool,
}

impl Microphone for VirtualMicrophone {
    fn start(&mut self, frame_samples: usize, on_frame: FrameCallback) -> Result<(), VoiceError> {
        if self.released {
            return Err(VoiceError::DeviceUnavailable("microphone already released".to_string()));
        }
        self.shared.mic.lock().taps.insert(
            self.id,
            MicTap {
                frame_samples: frame_samples.max(1),
                pending: Vec::with_capacity(frame_samples),
                on_frame,
            },
        );

        if self.shared.clock.mode == ClockMode::Wall {
            let shared = self.shared.clone();
            let stop_flag = self.stop_flag.clone();
            let id = self.id;
            let period = Duration::from_secs_f64(frame_samples.max(1) as f64 / self.sample_rate.max(1) as f64);
            let silence = vec![0.0f32; frame_samples.max(1)];
            let handle = thread::Builder::new()
                .name("virtual-microphone".to_string())
                .spawn(move || {
                    while !stop_flag.load(Ordering::SeqCst) {
                        thread::sleep(period);
                        if stop_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        shared.deliver(Some(id), &silence);
                    }
                })
                .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to start microphone: {}", e)))?;
            self.silence_thread = Some(handle);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stop_flag.store(true, Ordering::SeqCst);
        self.shared.mic.lock().taps.remove(&self.id);
        // The silence thread sees the flag on its next tick and exits on its own.
        self.silence_thread = None;
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
        debug!(microphone_id = self.id, "Virtual microphone stopped");
    }
}

impl Drop for VirtualMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScheduledSource {
    end_at: f64,
    on_ended: EndedCallback,
}

#[derive(Default)]
struct VirtualOutputState {
    next_id: SourceId,
    sources: BTreeMap<SourceId, ScheduledSource>,
    closed: bool,
}

/// Output device of the virtual backend.
pub struct VirtualOutput {
    sample_rate: u32,
    shared: Arc<VirtualShared>,
    state: Mutex<VirtualOutputState>,
}

impl VirtualOutput {
    fn fire_due(&self) {
        let now = self.shared.clock.now();
        let due: Vec<EndedCallback> = {
            let mut state = self.state.lock();
            let ids: Vec<SourceId> = state
                .sources
                .iter()
                .filter(|(_, source)| source.end_at <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.sources.remove(&id))
                .map(|source| source.on_ended)
                .collect()
        };
        for on_ended in due {
            on_ended();
        }
    }
}

impl OutputDevice for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.shared.clock.now()
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64, on_ended: EndedCallback) -> Result<SourceId, VoiceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(VoiceError::PlaybackError("output device is closed".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        let duration = samples.len() as f64 / self.sample_rate.max(1) as f64;
        state.sources.insert(
            id,
            ScheduledSource {
                end_at: start_at + duration,
                on_ended,
            },
        );
        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        self.state.lock().sources.remove(&id);
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.sources.clear();
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
        debug!("Virtual output closed");
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_fires_completions() {
        let backend = VirtualBackend::manual();
        let output = backend.open_output(24_000).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        output
            .schedule(vec![0.0; 24_000], 0.0, Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        backend.advance(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        backend.advance(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!((output.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stopped_sources_do_not_fire() {
        let backend = VirtualBackend::manual();
        let output = backend.open_output(24_000).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let id = output
            .schedule(vec![0.0; 100], 0.0, Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        output.stop_source(id);
        backend.advance(1.0);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_closed_output_rejects_segments() {
        let backend = VirtualBackend::manual();
        let output = backend.open_output(24_000).unwrap();
        assert_eq!(backend.open_handles(), 1);
        output.close();
        output.close();
        assert_eq!(backend.open_handles(), 0);
        let err = output.schedule(vec![0.0; 10], 0.0, Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), "playback_error");
    }

    #[test]
    fn test_microphone_frames_and_release() {
        let backend = VirtualBackend::manual();
        let mut mic = backend.open_microphone(16_000).unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        mic.start(4, Box::new(move |frame: &[f32]| sink.lock().push(frame.to_vec())))
            .unwrap();

        backend.feed_microphone(&[0.1, 0.2, 0.3]);
        assert!(frames.lock().is_empty());
        backend.feed_microphone(&[0.4, 0.5]);
        assert_eq!(frames.lock().as_slice(), &[vec![0.1, 0.2, 0.3, 0.4]]);

        mic.stop();
        mic.stop();
        backend.feed_microphone(&[0.0; 8]);
        assert_eq!(frames.lock().len(), 1);
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.running_microphones(), 0);
    }

    #[test]
    fn test_injected_device_failures() {
        let backend = VirtualBackend::manual();
        backend.deny_microphone(true);
        assert!(matches!(
            backend.open_microphone(16_000).err(),
            Some(VoiceError::PermissionDenied(_))
        ));
        backend.fail_output(true);
        assert!(matches!(
            backend.open_output(24_000).err(),
            Some(VoiceError::DeviceUnavailable(_))
        ));
        assert_eq!(backend.open_handles(), 0);
    }
}
