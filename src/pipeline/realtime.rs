//! Realtime capture pipeline
//!
//! Drives one capture session from backend chunks and user commands in a
//! single tokio task. Commands are polled before frames, so a stop that
//! arrives alongside audio always wins.

use crate::audio::{
    AudioBuffer, BackendEvent, CaptureBackend, EnergyEstimator, EnergySample, MicrophoneError,
    DEFAULT_WINDOW_MS,
};
use crate::config::CaptureConfig;
use crate::session::{CaptureError, CaptureSession, CaptureState, Transition};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Energy analysis window (ms)
    pub analysis_window_ms: u64,
    /// Fail the session when the first chunk after arming is digital silence
    pub reject_silent_input: bool,
    /// Capacity of the command queue
    pub command_capacity: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_window_ms: DEFAULT_WINDOW_MS,
            reject_silent_input: true,
            command_capacity: 16,
            event_capacity: 100,
        }
    }
}

/// Pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("pipeline task is no longer running")]
    NotRunning,

    #[error("pipeline task panicked: {0}")]
    Panicked(String),
}

/// Events published while the pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    StateChanged(Transition),
    Energy(EnergySample),
    Failed(MicrophoneError),
}

type Reply = oneshot::Sender<Result<(), CaptureError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Cancel(Reply),
    /// The handle is waiting for the outcome; keep the session running
    Finish,
}

/// Handle to a running capture pipeline
pub struct CapturePipeline {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<CaptureState>,
    events: broadcast::Sender<CaptureEvent>,
    task: JoinHandle<Result<Option<AudioBuffer>, CaptureError>>,
}

impl CapturePipeline {
    /// Spawns the pipeline task on the current tokio runtime.
    ///
    /// With `auto_start` the backend is opened right away and the session
    /// starts out armed. Backend `open` and `close` run on the task itself and
    /// may block while the device starts or stops, so hosts should use the
    /// multi-thread runtime.
    ///
    /// Dropping the handle cancels a session that is still armed; one that is
    /// already recording runs until the pause ends it.
    pub fn spawn<B>(backend: B, capture: CaptureConfig, config: PipelineConfig) -> Self
    where
        B: CaptureBackend + 'static,
    {
        let (commands, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (state_tx, state) = watch::channel(CaptureState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let worker = Worker {
            backend,
            session: CaptureSession::new(capture),
            estimator: None,
            stream: None,
            awaiting_first_chunk: false,
            config,
            state_tx,
            events: events.clone(),
        };
        let task = tokio::spawn(worker.run(command_rx));

        Self {
            commands,
            state,
            events,
            task,
        }
    }

    /// Opens the microphone and arms the session
    pub async fn start(&self) -> Result<(), PipelineError> {
        self.send(Command::Start).await
    }

    /// Finishes the recording now, keeping what was captured
    pub async fn stop(&self) -> Result<(), PipelineError> {
        self.send(Command::Stop).await
    }

    /// Discards the current recording and returns to idle
    pub async fn cancel(&self) -> Result<(), PipelineError> {
        self.send(Command::Cancel).await
    }

    /// Current session state
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Watch channel following the session state
    pub fn watch_state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    /// Subscribes to state changes and energy levels
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Whether the pipeline task has exited
    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session outcome.
    ///
    /// `Ok(None)` when the pipeline ends idle (never started or cancelled).
    /// An active session keeps running until it finishes on its own.
    pub async fn finish(self) -> Result<Option<AudioBuffer>, PipelineError> {
        let Self { commands, task, .. } = self;
        let _ = commands.send(Command::Finish).await;
        drop(commands);
        match task.await {
            Ok(outcome) => Ok(outcome?),
            Err(err) => Err(PipelineError::Panicked(err.to_string())),
        }
    }

    async fn send(&self, command: fn(Reply) -> Command) -> Result<(), PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| PipelineError::NotRunning)?;
        let result = reply_rx.await.map_err(|_| PipelineError::NotRunning)?;
        Ok(result?)
    }
}

enum Step {
    Command(Option<Command>),
    Backend(Option<BackendEvent>),
    Exhausted,
}

struct Worker<B> {
    backend: B,
    session: CaptureSession,
    estimator: Option<EnergyEstimator>,
    stream: Option<mpsc::Receiver<BackendEvent>>,
    awaiting_first_chunk: bool,
    config: PipelineConfig,
    state_tx: watch::Sender<CaptureState>,
    events: broadcast::Sender<CaptureEvent>,
}

impl<B: CaptureBackend> Worker<B> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<Option<AudioBuffer>, CaptureError> {
        if self.session.config().auto_start {
            if let Err(err) = self.begin() {
                tracing::warn!("Auto start failed: {}", err);
            }
        }

        let mut commands_open = true;
        let mut awaited = false;
        while !self.session.state().is_terminal() {
            let step = tokio::select! {
                biased;
                command = commands.recv(), if commands_open => Step::Command(command),
                event = next_event(&mut self.stream), if self.stream.is_some() => Step::Backend(event),
                else => Step::Exhausted,
            };

            match step {
                Step::Command(Some(Command::Finish)) => awaited = true,
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => {
                    tracing::debug!("Command channel closed");
                    commands_open = false;
                    if !awaited {
                        self.release_if_armed();
                    }
                }
                Step::Backend(Some(event)) => self.handle_backend(event),
                Step::Backend(None) => {
                    self.fail(MicrophoneError::DeviceUnavailable(
                        "audio stream disconnected".into(),
                    ));
                }
                Step::Exhausted => break,
            }
        }

        self.close_stream();
        match self.session.state() {
            CaptureState::Finished | CaptureState::Failed => self.session.take_buffer().map(Some),
            _ => Ok(None),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.begin());
            }
            Command::Stop(reply) => {
                let result = self.session.stop().map(|transition| {
                    self.close_stream();
                    self.publish(transition);
                });
                let _ = reply.send(result);
            }
            Command::Cancel(reply) => {
                let result = self.session.cancel().map(|transition| {
                    self.close_stream();
                    if let Some(transition) = transition {
                        self.publish(transition);
                    }
                });
                let _ = reply.send(result);
            }
            Command::Finish => {}
        }
    }

    /// Opens the backend and arms the session
    fn begin(&mut self) -> Result<(), CaptureError> {
        let state = self.session.state();
        if state != CaptureState::Idle {
            return Err(if state.is_terminal() {
                CaptureError::SessionClosed(state)
            } else {
                CaptureError::InvalidTransition {
                    action: "start",
                    state,
                }
            });
        }

        let stream = match self.backend.open(self.session.config().sample_rate) {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(err.clone());
                return Err(err.into());
            }
        };
        tracing::info!(
            "Listening on {} ({}Hz, {}ch)",
            self.backend.name(),
            stream.format.sample_rate,
            stream.format.channels
        );

        let transition = self.session.start(stream.format)?;
        self.estimator = Some(EnergyEstimator::with_window_ms(
            stream.format,
            self.config.analysis_window_ms,
        ));
        self.stream = Some(stream.events);
        self.awaiting_first_chunk = true;
        self.publish(transition);
        Ok(())
    }

    fn handle_backend(&mut self, event: BackendEvent) {
        let chunk = match event {
            BackendEvent::Frames(chunk) => chunk,
            BackendEvent::Error(err) => {
                self.fail(err);
                return;
            }
        };

        if self.awaiting_first_chunk {
            self.awaiting_first_chunk = false;
            if self.config.reject_silent_input && chunk.iter().all(|s| *s == 0.0) {
                self.fail(MicrophoneError::DeviceUnavailable(
                    "microphone delivers only silence".into(),
                ));
                return;
            }
        }

        let Some(estimator) = self.estimator.as_mut() else {
            return;
        };
        if let Err(err) = estimator.push(&chunk) {
            tracing::warn!("Dropping chunk: {}", err);
            return;
        }

        while let Some(window) = self.estimator.as_mut().and_then(Iterator::next) {
            let _ = self.events.send(CaptureEvent::Energy(window.energy));
            match self.session.ingest(window) {
                Ok(Some(transition)) => {
                    self.publish(transition);
                    if transition.to.is_terminal() {
                        self.close_stream();
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!("Window rejected: {}", err),
            }
        }
    }

    fn fail(&mut self, reason: MicrophoneError) {
        if let Ok(transition) = self.session.fail(reason.clone()) {
            self.close_stream();
            let _ = self.events.send(CaptureEvent::Failed(reason));
            self.publish(transition);
        }
    }

    /// Without a handle nobody can stop an armed session, so it is cancelled
    /// and the microphone released.
    fn release_if_armed(&mut self) {
        if self.session.state() != CaptureState::ArmedListening {
            return;
        }
        if let Ok(Some(transition)) = self.session.cancel() {
            self.close_stream();
            self.publish(transition);
        }
    }

    fn close_stream(&mut self) {
        self.estimator = None;
        if self.stream.take().is_some() {
            self.backend.close();
        }
    }

    fn publish(&self, transition: Transition) {
        tracing::info!("Capture {}", transition);
        self.state_tx.send_replace(transition.to);
        let _ = self.events.send(CaptureEvent::StateChanged(transition));
    }
}

async fn next_event(stream: &mut Option<mpsc::Receiver<BackendEvent>>) -> Option<BackendEvent> {
    match stream {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureStream, MockCaptureBackend, StreamFormat};
    use crate::config::EnergyThreshold;

    const RATE: u32 = 1000;
    const WINDOW: usize = 100;

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            analysis_window_ms: 100,
            ..Default::default()
        }
    }

    fn capture_config(pause_secs: f64, auto_start: bool) -> CaptureConfig {
        CaptureConfig::new(EnergyThreshold::symmetric(0.01), pause_secs, None, auto_start).unwrap()
    }

    /// Backend whose stream is fed by the returned sender
    fn mock_backend() -> (MockCaptureBackend, mpsc::Sender<BackendEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let mut backend = MockCaptureBackend::new();
        backend.expect_open().times(1).return_once(move |_| {
            Ok(CaptureStream {
                format: StreamFormat {
                    sample_rate: RATE,
                    channels: 1,
                },
                events: rx,
            })
        });
        backend.expect_close().return_const(());
        backend.expect_name().return_const("mock".to_string());
        (backend, tx)
    }

    fn loud() -> BackendEvent {
        BackendEvent::Frames(vec![0.5; WINDOW])
    }

    fn quiet() -> BackendEvent {
        BackendEvent::Frames(vec![0.001; WINDOW])
    }

    #[tokio::test]
    async fn idle_until_started() {
        let (backend, _tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.3, false), pipeline_config());
        tokio::task::yield_now().await;
        assert_eq!(pipeline.state(), CaptureState::Idle);

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), CaptureState::ArmedListening);
        assert!(matches!(
            pipeline.start().await,
            Err(PipelineError::Capture(CaptureError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn finishes_after_the_pause() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.3, true), pipeline_config());

        tx.send(quiet()).await.unwrap();
        tx.send(loud()).await.unwrap();
        for _ in 0..3 {
            tx.send(quiet()).await.unwrap();
        }

        let buffer = pipeline.finish().await.unwrap().expect("recording");
        assert_eq!(buffer.samples().len(), 4 * WINDOW);
        assert_eq!(buffer.sample_rate(), RATE);
    }

    #[tokio::test]
    async fn chunks_are_rewindowed() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.2, true), pipeline_config());
        let mut events = pipeline.subscribe();

        // 250 loud samples split oddly, then silence
        tx.send(BackendEvent::Frames(vec![0.5; 70])).await.unwrap();
        tx.send(BackendEvent::Frames(vec![0.5; 180])).await.unwrap();
        tx.send(BackendEvent::Frames(vec![0.001; 250])).await.unwrap();

        let buffer = pipeline.finish().await.unwrap().unwrap();
        // two loud windows, the mixed window, two quiet windows
        assert_eq!(buffer.samples().len(), 5 * WINDOW);

        let mut levels = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CaptureEvent::Energy(_)) {
                levels += 1;
            }
        }
        assert_eq!(levels, 5);
    }

    #[tokio::test]
    async fn pending_stop_wins_over_pending_frames() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(5.0, false), pipeline_config());
        pipeline.start().await.unwrap();

        tx.send(loud()).await.unwrap();
        let mut state = pipeline.watch_state();
        state
            .wait_for(|s| *s == CaptureState::Recording)
            .await
            .unwrap();

        for _ in 0..3 {
            tx.try_send(loud()).unwrap();
        }
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), CaptureState::Finished);

        let buffer = pipeline.finish().await.unwrap().unwrap();
        assert_eq!(buffer.samples().len(), WINDOW);
    }

    #[tokio::test]
    async fn stop_before_speech_returns_empty_buffer() {
        let (backend, _tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, true), pipeline_config());
        pipeline.stop().await.unwrap();

        let buffer = pipeline.finish().await.unwrap().unwrap();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_and_yields_nothing() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, false), pipeline_config());
        pipeline.start().await.unwrap();
        tx.send(quiet()).await.unwrap();

        pipeline.cancel().await.unwrap();
        assert_eq!(pipeline.state(), CaptureState::Idle);
        assert_eq!(pipeline.finish().await, Ok(None));
    }

    #[tokio::test]
    async fn backend_error_fails_the_session() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, true), pipeline_config());
        let mut events = pipeline.subscribe();

        tx.send(loud()).await.unwrap();
        let reason = MicrophoneError::PermissionDenied("revoked".into());
        tx.send(BackendEvent::Error(reason.clone())).await.unwrap();

        assert_eq!(
            pipeline.finish().await,
            Err(PipelineError::Capture(CaptureError::Backend(reason.clone())))
        );

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if event == CaptureEvent::Failed(reason.clone()) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn open_failure_is_reported_to_the_caller() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .return_once(|_| Err(MicrophoneError::DeviceUnavailable("no mic".into())));
        backend.expect_close().return_const(());
        backend.expect_name().return_const("mock".to_string());

        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, false), pipeline_config());
        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Capture(CaptureError::Backend(MicrophoneError::DeviceUnavailable(_)))
        ));
        assert_eq!(pipeline.state(), CaptureState::Failed);
    }

    #[tokio::test]
    async fn silent_device_is_rejected() {
        let (backend, tx) = mock_backend();
        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, true), pipeline_config());
        tx.send(BackendEvent::Frames(vec![0.0; WINDOW])).await.unwrap();

        let err = pipeline.finish().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Capture(CaptureError::Backend(MicrophoneError::DeviceUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_an_armed_session() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let (_tx, rx) = mpsc::channel(4);
        let mut backend = MockCaptureBackend::new();
        backend.expect_open().return_once(move |_| {
            Ok(CaptureStream {
                format: StreamFormat {
                    sample_rate: RATE,
                    channels: 1,
                },
                events: rx,
            })
        });
        backend
            .expect_close()
            .returning(move || flag.store(true, Ordering::SeqCst));
        backend.expect_name().return_const("mock".to_string());

        let pipeline = CapturePipeline::spawn(backend, capture_config(0.8, true), pipeline_config());
        let mut state = pipeline.watch_state();
        state
            .wait_for(|s| *s == CaptureState::ArmedListening)
            .await
            .unwrap();

        drop(pipeline);
        state.wait_for(|s| *s == CaptureState::Idle).await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn requested_sample_rate_reaches_the_backend() {
        let (tx, rx) = mpsc::channel(4);
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .withf(|rate| *rate == Some(22_050))
            .return_once(move |_| {
                Ok(CaptureStream {
                    format: StreamFormat {
                        sample_rate: 22_050,
                        channels: 2,
                    },
                    events: rx,
                })
            });
        backend.expect_close().return_const(());
        backend.expect_name().return_const("mock".to_string());

        let capture =
            CaptureConfig::new(EnergyThreshold::symmetric(0.01), 0.8, Some(22_050), true).unwrap();
        let pipeline = CapturePipeline::spawn(backend, capture, pipeline_config());
        pipeline.stop().await.unwrap();
        drop(tx);

        let buffer = pipeline.finish().await.unwrap().unwrap();
        assert_eq!(buffer.sample_rate(), 22_050);
        assert_eq!(buffer.channels(), 2);
    }
}
