//! Audio capture from the microphone
//!
//! Uses cpal for cross-platform capture and ringbuf to decouple the realtime
//! callback from the rest of the pipeline. The cpal stream lives on a
//! dedicated thread which drains the ring buffer into a tokio channel.

use super::backend::{BackendEvent, CaptureBackend, CaptureStream, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Seconds of audio the ring buffer can hold before the callback drops data
const RING_BUFFER_SECS: usize = 2;

/// Chunks queued between the capture thread and the pipeline
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How often the capture thread drains the ring buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Microphone capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MicrophoneError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio configuration error: {0}")]
    Config(String),

    #[error("audio stream error: {0}")]
    Stream(String),
}

impl MicrophoneError {
    /// Maps a backend-specific message, which is the only place platforms
    /// report permission problems.
    fn from_backend_message(message: String) -> Self {
        let lower = message.to_lowercase();
        let denied = ["permission", "denied", "not authorized"];
        if denied.iter().any(|needle| lower.contains(needle)) {
            MicrophoneError::PermissionDenied(message)
        } else {
            MicrophoneError::Stream(message)
        }
    }
}

impl From<cpal::BuildStreamError> for MicrophoneError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                MicrophoneError::DeviceUnavailable(err.to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => MicrophoneError::Config(err.to_string()),
            cpal::BuildStreamError::BackendSpecific { err } => {
                MicrophoneError::from_backend_message(err.description)
            }
            other => MicrophoneError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for MicrophoneError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                MicrophoneError::DeviceUnavailable(err.to_string())
            }
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                MicrophoneError::Config(err.to_string())
            }
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                MicrophoneError::from_backend_message(err.description)
            }
        }
    }
}

impl From<cpal::PlayStreamError> for MicrophoneError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                MicrophoneError::DeviceUnavailable(err.to_string())
            }
            cpal::PlayStreamError::BackendSpecific { err } => {
                MicrophoneError::from_backend_message(err.description)
            }
        }
    }
}

impl From<cpal::StreamError> for MicrophoneError {
    fn from(err: cpal::StreamError) -> Self {
        match err {
            cpal::StreamError::DeviceNotAvailable => {
                MicrophoneError::DeviceUnavailable(err.to_string())
            }
            cpal::StreamError::BackendSpecific { err } => {
                MicrophoneError::from_backend_message(err.description)
            }
        }
    }
}

struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Microphone input through cpal
pub struct CpalBackend {
    device_name: Option<String>,
    capture: Option<CaptureThread>,
}

impl CpalBackend {
    /// Uses the named input device, or the host default when `None`
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            capture: None,
        }
    }

    /// List available input devices
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CaptureBackend for CpalBackend {
    fn open(&mut self, sample_rate: Option<u32>) -> Result<CaptureStream, MicrophoneError> {
        self.close();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                run_audio_capture(device_name, sample_rate, event_tx, ready_tx, thread_running)
            })
            .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => {
                self.capture = Some(CaptureThread { running, handle });
                Ok(CaptureStream {
                    format,
                    events: event_rx,
                })
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(MicrophoneError::Stream("audio thread exited early".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.running.store(false, Ordering::Release);
            let _ = capture.handle.join();
            tracing::info!("Audio capture stopped");
        }
    }

    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, MicrophoneError> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| MicrophoneError::DeviceUnavailable(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| {
                    MicrophoneError::DeviceUnavailable(format!("input device '{name}' not found"))
                })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| MicrophoneError::DeviceUnavailable("no default input device".into())),
    }
}

/// Builds an input stream that converts every sample to f32 and pushes
/// whole callback buffers into the ring, or drops them when it is full.
fn build_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    dropped: Arc<AtomicUsize>,
    event_tx: mpsc::Sender<BackendEvent>,
    convert: F,
) -> Result<Stream, MicrophoneError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if producer.vacant_len() < data.len() {
                dropped.fetch_add(data.len(), Ordering::Relaxed);
                return;
            }
            scratch.clear();
            scratch.extend(data.iter().copied().map(&convert));
            producer.push_slice(&scratch);
        },
        move |err| {
            tracing::error!("Audio stream error: {}", err);
            let _ = event_tx.try_send(BackendEvent::Error(MicrophoneError::from(err)));
        },
        None,
    )?;
    Ok(stream)
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: Option<u32>,
    event_tx: mpsc::Sender<BackendEvent>,
    dropped: Arc<AtomicUsize>,
) -> Result<(Stream, StreamFormat, HeapCons<f32>), MicrophoneError> {
    let device = find_device(device_name)?;
    tracing::info!("Audio device: {:?}", device.name());

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let mut stream_config: StreamConfig = supported.config();
    if let Some(rate) = sample_rate {
        stream_config.sample_rate = SampleRate(rate);
    }
    let format = StreamFormat {
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
    };

    tracing::info!(
        "Audio config: {:?} {}Hz {}ch",
        sample_format,
        format.sample_rate,
        format.channels
    );

    let capacity = format.sample_rate as usize * usize::from(format.channels) * RING_BUFFER_SECS;
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream(
            &device,
            &stream_config,
            producer,
            dropped,
            event_tx,
            |sample: f32| sample,
        )?,
        SampleFormat::I16 => build_stream(
            &device,
            &stream_config,
            producer,
            dropped,
            event_tx,
            |sample: i16| sample as f32 / 32_768.0,
        )?,
        SampleFormat::U16 => build_stream(
            &device,
            &stream_config,
            producer,
            dropped,
            event_tx,
            |sample: u16| (sample as f32 - 32_768.0) / 32_768.0,
        )?,
        other => {
            return Err(MicrophoneError::Config(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    Ok((stream, format, consumer))
}

/// Run audio capture (in a dedicated thread)
fn run_audio_capture(
    device_name: Option<String>,
    sample_rate: Option<u32>,
    event_tx: mpsc::Sender<BackendEvent>,
    ready_tx: std_mpsc::Sender<Result<StreamFormat, MicrophoneError>>,
    running: Arc<AtomicBool>,
) {
    let dropped = Arc::new(AtomicUsize::new(0));
    let opened = open_stream(
        device_name.as_deref(),
        sample_rate,
        event_tx.clone(),
        Arc::clone(&dropped),
    )
    .and_then(|(stream, format, consumer)| {
        stream.play()?;
        Ok((stream, format, consumer))
    });

    let (stream, format, mut consumer) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            tracing::error!("Audio capture error: {}", err);
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    let _ = ready_tx.send(Ok(format));
    tracing::info!("Audio capture started");

    // The ring only ever holds whole frames, so draining in multiples of the
    // channel count keeps every chunk aligned.
    let channels = usize::from(format.channels.max(1));
    let chunk_len = (format.sample_rate as usize / 50).max(1) * channels;
    let mut chunk = vec![0.0f32; chunk_len];

    while running.load(Ordering::Acquire) {
        let read = consumer.pop_slice(&mut chunk);
        if read == 0 {
            thread::sleep(DRAIN_INTERVAL);
            continue;
        }
        if event_tx
            .blocking_send(BackendEvent::Frames(chunk[..read].to_vec()))
            .is_err()
        {
            break;
        }
    }

    if let Err(err) = stream.pause() {
        tracing::warn!("Failed to pause audio stream: {}", err);
    }
    drop(stream);

    let lost = dropped.load(Ordering::Relaxed);
    if lost > 0 {
        tracing::warn!("Dropped {} samples while the ring buffer was full", lost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_messages_mentioning_permission_are_classified() {
        assert!(matches!(
            MicrophoneError::from_backend_message("Permission denied by user".into()),
            MicrophoneError::PermissionDenied(_)
        ));
        assert!(matches!(
            MicrophoneError::from_backend_message("ALSA buffer underrun".into()),
            MicrophoneError::Stream(_)
        ));
    }

    #[test]
    fn missing_device_maps_to_device_unavailable() {
        let err = MicrophoneError::from(cpal::BuildStreamError::DeviceNotAvailable);
        assert!(matches!(err, MicrophoneError::DeviceUnavailable(_)));

        let err = MicrophoneError::from(cpal::StreamError::DeviceNotAvailable);
        assert!(matches!(err, MicrophoneError::DeviceUnavailable(_)));
    }

    #[test]
    fn unsupported_config_maps_to_config_error() {
        let err = MicrophoneError::from(cpal::BuildStreamError::StreamConfigNotSupported);
        assert!(matches!(err, MicrophoneError::Config(_)));
    }
}
