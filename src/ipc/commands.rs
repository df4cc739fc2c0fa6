//! Recorder commands for the host UI
//!
//! Each mounted widget owns one capture pipeline. A finished recording is
//! encoded once and kept as the widget's value until the next recording
//! completes.

use crate::audio::{encode_wav, AudioBuffer, CaptureBackend};
use crate::component::{encode_component_value, RecorderOptions};
use crate::pipeline::{CapturePipeline, PipelineConfig};
use crate::session::CaptureState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Creates a fresh backend for each recording
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn CaptureBackend> + Send + Sync>;

/// One mounted recorder widget
pub struct RecorderInstance {
    options: RecorderOptions,
    make_backend: BackendFactory,
    pipeline: Option<CapturePipeline>,
    /// Finished recording not yet encoded
    pending: Option<AudioBuffer>,
    value: Option<String>,
    /// Why the last recording failed
    failure: Option<String>,
}

impl RecorderInstance {
    fn spawn_pipeline(&mut self) -> Result<(), String> {
        let capture = self.options.capture_config().map_err(|e| e.to_string())?;
        let backend = (self.make_backend)();
        self.pipeline = Some(CapturePipeline::spawn(
            backend,
            capture,
            PipelineConfig::default(),
        ));
        Ok(())
    }

    fn state(&self) -> CaptureState {
        match (&self.pipeline, &self.failure) {
            (Some(pipeline), _) => pipeline.state(),
            (None, Some(_)) => CaptureState::Failed,
            (None, None) => CaptureState::Idle,
        }
    }

    /// Moves a finished recording into `value`.
    ///
    /// A failed recording is remembered in `failure`. A buffer that cannot
    /// be encoded stays pending, so a later call retries it.
    async fn collect(&mut self) -> Result<(), String> {
        let finished = self
            .pipeline
            .as_ref()
            .map(|p| p.state().is_terminal())
            .unwrap_or(false);
        if finished {
            if let Some(pipeline) = self.pipeline.take() {
                match pipeline.finish().await {
                    Err(err) => {
                        tracing::warn!("Recording failed: {}", err);
                        self.failure = Some(err.to_string());
                    }
                    Ok(None) => tracing::debug!("Pipeline ended without a recording"),
                    Ok(Some(buffer)) => self.pending = Some(buffer),
                }
            }
        }

        if let Some(buffer) = self.pending.as_ref() {
            let wav = encode_wav(buffer).map_err(|e| e.to_string())?;
            let value = encode_component_value(&wav).map_err(|e| e.to_string())?;
            tracing::info!(
                "Recording ready: {:.2}s, {} WAV bytes",
                buffer.duration().as_secs_f64(),
                wav.len()
            );
            self.value = Some(value);
            self.pending = None;
        }
        Ok(())
    }

    /// Current widget value, or the reason the last recording failed
    fn outcome(&self) -> Result<Option<String>, String> {
        match &self.failure {
            Some(reason) => Err(reason.clone()),
            None => Ok(self.value.clone()),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub recorders: Arc<Mutex<HashMap<String, RecorderInstance>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            recorders: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Status response for the UI
#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub state: String,
    pub is_recording: bool,
    pub color: String,
    pub text: String,
    pub has_value: bool,
    /// Reason the last recording failed
    pub error: Option<String>,
}

/// Places a recorder widget and returns its key.
///
/// Options are validated before anything is opened. With `auto_start` the
/// recorder begins listening immediately. Mounting an existing key updates
/// that widget's options for its next recording and keeps its session and
/// value.
pub async fn mount_recorder(
    state: &AppState,
    options: RecorderOptions,
    make_backend: BackendFactory,
) -> Result<String, String> {
    options.capture_config().map_err(|e| e.to_string())?;

    let mut recorders = state.recorders.lock().await;
    let key = match options.key.clone() {
        Some(key) => key,
        None => unused_key(&recorders),
    };

    if let Some(existing) = recorders.get_mut(&key) {
        existing.options = options;
        existing.make_backend = make_backend;
        tracing::info!("Recorder {} remounted", key);
        return Ok(key);
    }

    let mut instance = RecorderInstance {
        options,
        make_backend,
        pipeline: None,
        pending: None,
        value: None,
        failure: None,
    };
    if instance.options.auto_start {
        instance.spawn_pipeline()?;
    }
    recorders.insert(key.clone(), instance);

    tracing::info!("Recorder {} mounted", key);
    Ok(key)
}

fn unused_key(recorders: &HashMap<String, RecorderInstance>) -> String {
    let mut index = recorders.len();
    loop {
        let key = format!("{}_{}", crate::component::COMPONENT_NAME, index);
        if !recorders.contains_key(&key) {
            return key;
        }
        index += 1;
    }
}

/// Starts listening; a previous finished recording is kept as the value
/// until the new one completes.
pub async fn start_recording(state: &AppState, key: &str) -> Result<(), String> {
    let mut recorders = state.recorders.lock().await;
    let instance = recorders
        .get_mut(key)
        .ok_or_else(|| format!("unknown recorder: {key}"))?;

    instance.collect().await?;
    instance.failure = None;
    if instance.pipeline.is_none() {
        instance.spawn_pipeline()?;
    }
    if let Some(ref pipeline) = instance.pipeline {
        if pipeline.state() == CaptureState::Idle {
            pipeline.start().await.map_err(|e| e.to_string())?;
        }
    }

    tracing::info!("Recorder {} listening", key);
    Ok(())
}

/// Finishes the current recording.
///
/// Fails with the reason when the recording had already failed.
pub async fn stop_recording(state: &AppState, key: &str) -> Result<(), String> {
    let mut recorders = state.recorders.lock().await;
    let instance = recorders
        .get_mut(key)
        .ok_or_else(|| format!("unknown recorder: {key}"))?;

    if let Some(ref pipeline) = instance.pipeline {
        if !pipeline.state().is_terminal() {
            pipeline.stop().await.map_err(|e| e.to_string())?;
        }
    }
    instance.collect().await?;
    instance.outcome()?;

    tracing::info!("Recorder {} stopped", key);
    Ok(())
}

/// Discards the current recording
pub async fn cancel_recording(state: &AppState, key: &str) -> Result<(), String> {
    let mut recorders = state.recorders.lock().await;
    let instance = recorders
        .get_mut(key)
        .ok_or_else(|| format!("unknown recorder: {key}"))?;

    if let Some(ref pipeline) = instance.pipeline {
        pipeline.cancel().await.map_err(|e| e.to_string())?;
    }

    tracing::info!("Recorder {} cancelled", key);
    Ok(())
}

/// Returns the current status of a recorder
pub async fn get_status(state: &AppState, key: &str) -> Result<StatusResponse, String> {
    let recorders = state.recorders.lock().await;
    let instance = recorders
        .get(key)
        .ok_or_else(|| format!("unknown recorder: {key}"))?;

    let capture_state = instance.state();
    Ok(StatusResponse {
        state: capture_state.label().to_string(),
        is_recording: capture_state.is_active(),
        color: instance.options.indicator_color(capture_state).to_string(),
        text: instance.options.text.clone(),
        has_value: instance.value.is_some(),
        error: instance.failure.clone(),
    })
}

/// Returns the widget value: the last recording as a JSON byte array, or
/// `None` while no recording has completed. A failed recording is reported
/// as an error until the next start.
pub async fn take_value(state: &AppState, key: &str) -> Result<Option<String>, String> {
    let mut recorders = state.recorders.lock().await;
    let instance = recorders
        .get_mut(key)
        .ok_or_else(|| format!("unknown recorder: {key}"))?;

    instance.collect().await?;
    instance.outcome()
}
