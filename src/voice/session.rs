//! # Voice Session Controller
//!
//! Owns the single realtime voice session: microphone, output device,
//! streaming connection and the tasks that move data between them.
//!
//! ## State machine:
//! ```text
//! Idle ──start()──▶ Opening ──setupComplete──▶ Open ──stop()/error/close──▶ Closing ──▶ Idle
//!                      │                                                        ▲
//!                      └──────────── any failure / stop() ──────────────────────┘
//! ```
//!
//! ## Guarantees:
//! - `start()` fails fast with `AlreadyActive` unless the controller is `Idle`
//! - every exit path (failed start, user stop, remote error, remote close)
//!   stops capture and closes both device contexts
//! - `stop()` is idempotent and safe from any state
//! - no retries and no reconnection: a remote error ends the session
//!
//! ## Epochs:
//! Each `start()` gets a fresh epoch number. Background tasks carry the epoch
//! they were spawned for, and their stop requests are ignored once the
//! controller has moved on. A late error from an old connection can therefore
//! never tear down a newer session.

use crate::audio::capture::{CapturePipeline, CaptureStats};
use crate::audio::codec;
use crate::audio::device::{AudioBackend, Microphone, OutputDevice};
use crate::audio::playback::{Enqueued, PlaybackScheduler};
use crate::config::AppConfig;
use crate::error::VoiceError;
use crate::events::{EventBus, UiEvent, VoiceStatus};
use crate::voice::protocol::{ClientMessage, ServerEvent, ServerMessage, Setup};
use crate::voice::tools::{self, ToolBridge, ViewStateAccess};
use crate::voice::transport::{self, Frame, LiveSource};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opening,
    Open,
    Closing,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    User,
    RemoteClosed(Option<String>),
    RemoteError(VoiceError),
    PlaybackFailed(VoiceError),
    Shutdown,
}

impl StopReason {
    fn describe(&self) -> Option<String> {
        match self {
            StopReason::User | StopReason::Shutdown => None,
            StopReason::RemoteClosed(reason) => Some(match reason {
                Some(reason) => format!("remote closed the session: {}", reason),
                None => "remote closed the session".to_string(),
            }),
            StopReason::RemoteError(err) | StopReason::PlaybackFailed(err) => Some(err.to_string()),
        }
    }
}

/// Everything a session needs from configuration, captured at `start()`.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_samples: usize,
    pub outbound_capacity: usize,
    pub max_queued_segments: usize,
    pub connect_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.gemini.live_endpoint.clone(),
            api_key: config.gemini.api_key.clone(),
            model: config.gemini.live_model.clone(),
            voice: config.gemini.live_voice.clone(),
            system_instruction: config.voice.system_instruction.clone(),
            input_sample_rate: config.voice.input_sample_rate,
            output_sample_rate: config.voice.output_sample_rate,
            frame_samples: config.voice.capture_frame_samples,
            outbound_capacity: config.voice.outbound_queue_capacity.max(1),
            max_queued_segments: config.voice.max_queued_segments,
            connect_timeout: Duration::from_secs(config.voice.connect_timeout_secs.max(1)),
        }
    }

    fn setup_message(&self) -> ClientMessage {
        ClientMessage::Setup(Setup::new(
            &self.model,
            &self.voice,
            &self.system_instruction,
            tools::declarations(),
        ))
    }
}

/// Snapshot returned by `GET /voice/status` and by `start()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub backend: &'static str,
    pub capture: Option<CaptureStats>,
    pub queued_segments: usize,
    pub dropped_segments: u64,
}

/// Resources of an open session.
struct ActiveSession {
    session_id: String,
    started_at: DateTime<Utc>,
    capture: Arc<CapturePipeline>,
    playback: PlaybackScheduler,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    fn teardown(self) {
        self.capture.stop();
        self.playback.shutdown();
        let _ = self.shutdown.send(true);
        // Tasks exit on the shutdown signal; they are not awaited because
        // teardown may run on one of them.
        drop(self.tasks);
    }
}

struct Control {
    state: SessionState,
    epoch: u64,
    opening_cancel: Option<watch::Sender<bool>>,
    active: Option<ActiveSession>,
    last_error: Option<String>,
}

struct SessionInner {
    settings: RwLock<SessionSettings>,
    backend: Arc<dyn AudioBackend>,
    bridge: ToolBridge,
    events: EventBus,
    control: Mutex<Control>,
}

impl SessionInner {
    fn publish(&self, status: VoiceStatus, detail: Option<String>) {
        self.events.publish(UiEvent::VoiceStatus { status, detail });
    }

    /// Stop the session if it still belongs to `epoch` (or unconditionally for `None`).
    /// Returns whether anything was stopped.
    fn stop(&self, epoch: Option<u64>, reason: StopReason) -> bool {
        let (active, was_open) = {
            let mut control = self.control.lock();
            if epoch.is_some_and(|e| e != control.epoch) {
                debug!(?epoch, current = control.epoch, "Ignoring stop from a previous session");
                return false;
            }
            match control.state {
                SessionState::Idle | SessionState::Closing => return false,
                SessionState::Opening => {
                    // The opening future sees the signal and unwinds itself.
                    if let Some(cancel) = control.opening_cancel.take() {
                        let _ = cancel.send(true);
                    }
                    control.state = SessionState::Closing;
                    info!(?reason, "Voice session start cancelled");
                    return true;
                }
                SessionState::Open => {}
            }
            control.state = SessionState::Closing;
            control.last_error = reason.describe();
            (control.active.take(), true)
        };

        if let Some(active) = active {
            let session_id = active.session_id.clone();
            active.teardown();
            match &reason {
                StopReason::User | StopReason::Shutdown => info!(session_id = %session_id, "Voice session stopped"),
                other => warn!(session_id = %session_id, reason = ?other, "Voice session ended"),
            }
        }

        self.control.lock().state = SessionState::Idle;
        if was_open {
            self.publish(VoiceStatus::Inactive, reason.describe());
        }
        true
    }
}

/// Releases whatever a half-finished `start()` acquired.
///
/// Dropping it armed (failed start, cancelled future, panic) returns the
/// controller to `Idle` as long as no newer session has taken over.
struct OpeningGuard {
    inner: Arc<SessionInner>,
    epoch: u64,
    microphone: Option<Box<dyn Microphone>>,
    output: Option<Arc<dyn OutputDevice>>,
    armed: bool,
}

impl OpeningGuard {
    fn release(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
        let mut control = self.inner.control.lock();
        if control.epoch == self.epoch && matches!(control.state, SessionState::Opening | SessionState::Closing) {
            control.state = SessionState::Idle;
            control.opening_cancel = None;
        }
    }

    fn fail(mut self, err: &VoiceError) {
        self.armed = false;
        self.release();
        self.inner.control.lock().last_error = Some(err.to_string());
        error!(error = %err, kind = err.kind(), "Voice session failed to start");
        self.inner.publish(VoiceStatus::FailedToStart, Some(err.to_string()));
    }
}

impl Drop for OpeningGuard {
    fn drop(&mut self) {
        if self.armed {
            self.release();
        }
    }
}

/// Handle to the voice session controller. Cheap to clone.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl VoiceSession {
    /// Build a controller. The view-state accessor is the only way the
    /// session reads or changes application state.
    pub fn new(
        settings: SessionSettings,
        backend: Arc<dyn AudioBackend>,
        view_state: Arc<dyn ViewStateAccess>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                settings: RwLock::new(settings),
                backend,
                bridge: ToolBridge::new(view_state),
                events,
                control: Mutex::new(Control {
                    state: SessionState::Idle,
                    epoch: 0,
                    opening_cancel: None,
                    active: None,
                    last_error: None,
                }),
            }),
        }
    }

    /// New settings apply from the next `start()`.
    pub fn update_settings(&self, settings: SessionSettings) {
        *self.inner.settings.write() = settings;
    }

    pub fn state(&self) -> SessionState {
        self.inner.control.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn status(&self) -> SessionStatus {
        let control = self.inner.control.lock();
        let active = control.active.as_ref();
        SessionStatus {
            state: control.state,
            active: control.state == SessionState::Open,
            session_id: active.map(|a| a.session_id.clone()),
            started_at: active.map(|a| a.started_at),
            last_error: control.last_error.clone(),
            backend: self.inner.backend.name(),
            capture: active.map(|a| a.capture.stats()),
            queued_segments: active.map(|a| a.playback.active_count()).unwrap_or(0),
            dropped_segments: active.map(|a| a.playback.dropped_segments()).unwrap_or(0),
        }
    }

    /// Acquire devices, open the connection and start streaming.
    ///
    /// ## Steps:
    /// 1. `Idle → Opening` (else `AlreadyActive`)
    /// 2. Microphone at the input rate, output at the output rate
    /// 3. Connect and exchange `setup` / `setupComplete` within the timeout
    /// 4. `Opening → Open`, spawn reader and writer, start capture
    ///
    /// Any failure unwinds the acquisitions made so far, returns to `Idle`
    /// and publishes one `failed_to_start` event.
    pub async fn start(&self) -> Result<SessionStatus, VoiceError> {
        let (epoch, mut cancel_rx) = {
            let mut control = self.inner.control.lock();
            if control.state != SessionState::Idle {
                return Err(VoiceError::AlreadyActive);
            }
            control.state = SessionState::Opening;
            control.epoch += 1;
            control.last_error = None;
            let (cancel_tx, cancel_rx) = watch::channel(false);
            control.opening_cancel = Some(cancel_tx);
            (control.epoch, cancel_rx)
        };
        let settings = self.inner.settings.read().clone();
        let session_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("voice_session", session_id = %session_id);

        let mut guard = OpeningGuard {
            inner: self.inner.clone(),
            epoch,
            microphone: None,
            output: None,
            armed: true,
        };

        let opened = self
            .open(&settings, &mut guard, &mut cancel_rx)
            .instrument(span.clone())
            .await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                guard.fail(&err);
                return Err(err);
            }
        };

        let committed = span.in_scope(|| self.commit(epoch, session_id, &settings, &mut guard, stream, span.clone()));
        match committed {
            Ok(()) => {
                guard.armed = false;
                info!(backend = self.inner.backend.name(), "Voice session active");
                self.inner.publish(VoiceStatus::Active, None);
                Ok(self.status())
            }
            Err(err) => {
                guard.fail(&err);
                Err(err)
            }
        }
    }

    async fn open(
        &self,
        settings: &SessionSettings,
        guard: &mut OpeningGuard,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<transport::LiveStream, VoiceError> {
        let backend = &self.inner.backend;
        guard.microphone = Some(backend.open_microphone(settings.input_sample_rate)?);
        guard.output = Some(backend.open_output(settings.output_sample_rate)?);
        debug!(
            input_rate = settings.input_sample_rate,
            output_rate = settings.output_sample_rate,
            "Audio devices acquired"
        );

        if settings.api_key.trim().is_empty() {
            warn!("No API key configured; the live service will likely reject the connection");
        }

        let setup = settings.setup_message();
        let handshake = tokio::time::timeout(
            settings.connect_timeout,
            transport::handshake(&settings.endpoint, &settings.api_key, &setup),
        );

        tokio::select! {
            result = handshake => match result {
                Ok(stream) => stream,
                Err(_) => Err(VoiceError::ConnectionFailed(format!(
                    "setup did not complete within {}s",
                    settings.connect_timeout.as_secs()
                ))),
            },
            _ = cancel_rx.changed() => Err(VoiceError::ConnectionFailed("start cancelled by stop()".to_string())),
        }
    }

    /// Move the opened resources into an `ActiveSession` and start streaming.
    fn commit(
        &self,
        epoch: u64,
        session_id: String,
        settings: &SessionSettings,
        guard: &mut OpeningGuard,
        stream: transport::LiveStream,
        span: tracing::Span,
    ) -> Result<(), VoiceError> {
        let (microphone, output) = match (guard.microphone.take(), guard.output.take()) {
            (Some(microphone), Some(output)) => (microphone, output),
            _ => return Err(VoiceError::DeviceUnavailable("audio devices were released during start".to_string())),
        };

        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientMessage>(settings.outbound_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let capture = Arc::new(CapturePipeline::new(microphone, settings.input_sample_rate));
        let playback = PlaybackScheduler::new(output, settings.max_queued_segments);

        {
            let mut control = self.inner.control.lock();
            if control.epoch != epoch || control.state != SessionState::Opening {
                capture.stop();
                playback.shutdown();
                return Err(VoiceError::ConnectionFailed("start cancelled by stop()".to_string()));
            }

            let weak = Arc::downgrade(&self.inner);
            let writer = tokio::spawn(
                {
                    let weak = weak.clone();
                    let shutdown_rx = shutdown_rx.clone();
                    async move {
                        if let Err(err) = transport::run_writer(sink, outbound_rx, shutdown_rx).await {
                            if let Some(inner) = weak.upgrade() {
                                inner.stop(Some(epoch), StopReason::RemoteError(err));
                            }
                        }
                    }
                }
                .instrument(span.clone()),
            );

            let worker = InboundWorker {
                session: weak,
                epoch,
                bridge: self.inner.bridge.clone(),
                playback: playback.clone(),
                outbound: outbound_tx.clone(),
            };
            let reader = tokio::spawn(worker.run(source, shutdown_rx).instrument(span));

            control.state = SessionState::Open;
            control.opening_cancel = None;
            control.active = Some(ActiveSession {
                session_id,
                started_at: Utc::now(),
                capture: capture.clone(),
                playback,
                shutdown: shutdown_tx,
                tasks: vec![writer, reader],
            });
        }

        if let Err(err) = capture.start(settings.frame_samples, outbound_tx) {
            self.inner.stop(Some(epoch), StopReason::RemoteError(err.clone()));
            return Err(err);
        }
        Ok(())
    }

    /// Stop whatever is running. Returns `false` when there was nothing to stop.
    pub fn stop(&self) -> bool {
        self.inner.stop(None, StopReason::User)
    }

    /// Stop as part of server shutdown.
    pub fn shutdown(&self) {
        self.inner.stop(None, StopReason::Shutdown);
    }
}

/// Handles everything the server sends during an open session.
struct InboundWorker {
    session: Weak<SessionInner>,
    epoch: u64,
    bridge: ToolBridge,
    playback: PlaybackScheduler,
    outbound: mpsc::Sender<ClientMessage>,
}

impl InboundWorker {
    async fn run(self, mut source: LiveSource, mut shutdown: watch::Receiver<bool>) {
        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                next = source.next() => {
                    let message = match next {
                        None => break StopReason::RemoteClosed(None),
                        Some(Err(e)) => break StopReason::RemoteError(VoiceError::ConnectionError(e.to_string())),
                        Some(Ok(message)) => message,
                    };
                    match transport::classify_frame(message) {
                        Frame::Payload(payload) => {
                            if let Err(reason) = self.handle_payload(&payload).await {
                                break reason;
                            }
                        }
                        Frame::Closed(reason) => break StopReason::RemoteClosed(reason),
                        Frame::Ignored => {}
                    }
                }
            }
        };

        if let Some(inner) = self.session.upgrade() {
            inner.stop(Some(self.epoch), reason);
        }
    }

    /// Process one server message. An `Err` ends the session with that reason.
    async fn handle_payload(&self, payload: &[u8]) -> Result<(), StopReason> {
        let message = match ServerMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable server message");
                return Ok(());
            }
        };

        for event in message.into_events() {
            match event {
                ServerEvent::ToolCalls(calls) => {
                    for call in &calls {
                        let result = self.bridge.handle(call);
                        info!(tool = %result.name, id = %result.id, result = %result.result, "Tool call answered");
                        let response = ClientMessage::tool_result(&result.id, &result.name, &result.result);
                        if self.outbound.send(response).await.is_err() {
                            return Err(StopReason::RemoteError(VoiceError::ConnectionError(
                                "outbound queue closed".to_string(),
                            )));
                        }
                    }
                }
                ServerEvent::Audio(data) => {
                    match codec::decode_chunk(&data).and_then(|samples| self.playback.enqueue(samples)) {
                        Ok(Enqueued::Scheduled(_)) | Ok(Enqueued::Dropped) => {}
                        Err(err) if err.is_session_fatal() => return Err(StopReason::PlaybackFailed(err)),
                        Err(err) => warn!(error = %err, "Dropping unplayable audio chunk"),
                    }
                }
                ServerEvent::Interrupted => {
                    debug!("Model interrupted, flushing playback");
                    self.playback.interrupt();
                }
                ServerEvent::TurnComplete => debug!("Model turn complete"),
                ServerEvent::ToolCallsCancelled(ids) => {
                    debug!(?ids, "Server cancelled tool calls that were already answered")
                }
                ServerEvent::GoAway(time_left) => {
                    warn!(?time_left, "Live service is about to close the session")
                }
                ServerEvent::SetupComplete => {}
            }
        }
        Ok(())
    }
}
