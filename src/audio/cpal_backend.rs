//! # Hardware Audio (cpal)
//!
//! Real microphone and speaker access. Compiled only with the
//! `device-audio` feature.
//!
//! cpal streams are not `Send`, so every stream lives on its own thread and
//! is controlled through channels. The output side is a small mixer: each
//! scheduled source has a start frame on the output's frame counter, and the
//! stream callback sums whatever sources overlap the buffer it is filling.
//! Finished sources are handed to a notifier thread which runs their
//! completion callbacks, keeping them off the realtime callback.

use crate::audio::device::{AudioBackend, EndedCallback, FrameCallback, Microphone, OutputDevice, SourceId};
use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{error, info, warn};

pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a stream config at exactly `sample_rate`. Devices that cannot run at
/// that rate are reported unavailable; the pipeline does not resample.
fn resolve_config(device: &Device, sample_rate: u32, input: bool) -> Result<StreamConfig, VoiceError> {
    let desired = SampleRate(sample_rate);
    let ranges: Vec<cpal::SupportedStreamConfigRange> = if input {
        device
            .supported_input_configs()
            .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot query input configs: {}", e)))?
            .collect()
    } else {
        device
            .supported_output_configs()
            .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot query output configs: {}", e)))?
            .collect()
    };

    ranges
        .into_iter()
        .filter(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= desired
                && desired <= range.max_sample_rate()
        })
        .min_by_key(|range| range.channels())
        .map(|range| range.with_sample_rate(desired).into())
        .ok_or_else(|| {
            VoiceError::DeviceUnavailable(format!("device does not support f32 audio at {} Hz", sample_rate))
        })
}

fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Map a cpal build error onto the voice taxonomy. Hosts report refused
/// access differently; the ones that say so get `PermissionDenied`.
fn build_error(err: cpal::BuildStreamError) -> VoiceError {
    let message = err.to_string();
    if message.to_lowercase().contains("permission") {
        VoiceError::PermissionDenied(message)
    } else {
        VoiceError::DeviceUnavailable(message)
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn Microphone>, VoiceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::DeviceUnavailable("no input audio device found".to_string()))?;
        let config = resolve_config(&device, sample_rate, true)?;
        info!(
            device = %device.name().unwrap_or_else(|_| "<unknown>".into()),
            sample_rate,
            channels = config.channels,
            "Microphone acquired"
        );
        Ok(Box::new(CpalMicrophone {
            device: Some(device),
            config,
            stop_tx: None,
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>, VoiceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::DeviceUnavailable("no output audio device found".to_string()))?;
        let config = resolve_config(&device, sample_rate, false)?;
        CpalOutput::open(device, config).map(|output| output as Arc<dyn OutputDevice>)
    }
}

/// Microphone whose stream is built lazily by `start`, on a dedicated thread.
struct CpalMicrophone {
    device: Option<Device>,
    config: StreamConfig,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, frame_samples: usize, mut on_frame: FrameCallback) -> Result<(), VoiceError> {
        let device = self
            .device
            .take()
            .ok_or_else(|| VoiceError::DeviceUnavailable("microphone already started or released".to_string()))?;
        let config = self.config.clone();
        let channels = config.channels;
        let frame_samples = frame_samples.max(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), VoiceError>>();

        thread::Builder::new()
            .name("cpal-microphone".to_string())
            .spawn(move || {
                let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        pending.extend_from_slice(&downmix_to_mono(data, channels));
                        while pending.len() >= frame_samples {
                            let frame: Vec<f32> = pending.drain(..frame_samples).collect();
                            on_frame(&frame);
                        }
                    },
                    |err| error!("Audio capture error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(build_error(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() sends or the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::DeviceUnavailable("capture thread exited before starting".to_string()))??;
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        self.device = None;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MixSource {
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

#[derive(Default)]
struct MixerState {
    frames_played: u64,
    next_id: SourceId,
    sources: BTreeMap<SourceId, MixSource>,
}

struct CpalOutput {
    sample_rate: u32,
    mixer: Arc<Mutex<MixerState>>,
    closed: AtomicBool,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalOutput {
    fn open(device: Device, config: StreamConfig) -> Result<Arc<Self>, VoiceError> {
        let sample_rate = config.sample_rate.0;
        let channels = config.channels.max(1) as usize;
        let mixer = Arc::new(Mutex::new(MixerState::default()));
        let (ended_tx, ended_rx) = mpsc::channel::<EndedCallback>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), VoiceError>>();

        thread::Builder::new()
            .name("cpal-output-notify".to_string())
            .spawn(move || {
                while let Ok(on_ended) = ended_rx.recv() {
                    on_ended();
                }
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to spawn notifier: {}", e)))?;

        let stream_mixer = mixer.clone();
        thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut state = stream_mixer.lock();
                        let base = state.frames_played;
                        let frames = data.len() / channels;
                        for (i, frame) in data.chunks_mut(channels).enumerate() {
                            let at = base + i as u64;
                            let mut value = 0.0f32;
                            for source in state.sources.values() {
                                if at >= source.start_frame {
                                    if let Some(sample) = source.samples.get((at - source.start_frame) as usize) {
                                        value += *sample;
                                    }
                                }
                            }
                            frame.fill(value);
                        }
                        state.frames_played += frames as u64;
                        let now = state.frames_played;
                        let finished: Vec<SourceId> = state
                            .sources
                            .iter()
                            .filter(|(_, s)| s.start_frame + s.samples.len() as u64 <= now)
                            .map(|(id, _)| *id)
                            .collect();
                        for id in finished {
                            if let Some(on_ended) = state.sources.remove(&id).and_then(|s| s.on_ended) {
                                let _ = ended_tx.send(on_ended);
                            }
                        }
                    },
                    |err| error!("Audio playback error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(build_error(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to spawn output thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::DeviceUnavailable("output thread exited before starting".to_string()))??;
        info!(sample_rate, channels, "Output device opened");

        Ok(Arc::new(Self {
            sample_rate,
            mixer,
            closed: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
        }))
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().frames_played as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64, on_ended: EndedCallback) -> Result<SourceId, VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::PlaybackError("output device is closed".to_string()));
        }
        let mut state = self.mixer.lock();
        state.next_id += 1;
        let id = state.next_id;
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        state.sources.insert(
            id,
            MixSource {
                start_frame,
                samples,
                on_ended: Some(on_ended),
            },
        );
        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        self.mixer.lock().sources.remove(&id);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mixer.lock().sources.clear();
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            if stop_tx.send(()).is_err() {
                warn!("Output stream thread already gone");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
