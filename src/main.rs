//! Audio Recorder - command line capture
//!
//! Enter toggles listening, Ctrl-C discards the recording.

use anyhow::{Context, Result};
use audio_recorder::audio::{encode_wav, CpalBackend};
use audio_recorder::component::{ComponentEnv, ComponentSource, DeclaredComponent};
use audio_recorder::config::{
    CaptureConfig, EnergyThreshold, DEFAULT_ENERGY_THRESHOLD, DEFAULT_PAUSE_SECS,
};
use audio_recorder::pipeline::{CapturePipeline, PipelineConfig};
use audio_recorder::session::CaptureState;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "audio-recorder", version, about = "Voice-activated microphone recorder")]
struct Args {
    /// Energy level that both starts and ends a recording
    #[arg(long, conflicts_with_all = ["start_threshold", "end_threshold"])]
    energy_threshold: Option<f32>,

    /// Energy level that starts a recording
    #[arg(long, requires = "end_threshold")]
    start_threshold: Option<f32>,

    /// Energy level below which silence is counted
    #[arg(long, requires = "start_threshold")]
    end_threshold: Option<f32>,

    /// Seconds of silence that end a recording
    #[arg(long, default_value_t = DEFAULT_PAUSE_SECS)]
    pause_threshold: f64,

    /// Requested sample rate (Hz), device default when omitted
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Input device name, default device when omitted
    #[arg(long, env = "AUDIO_RECORDER_DEVICE")]
    device: Option<String>,

    /// Start listening immediately
    #[arg(long)]
    auto_start: bool,

    /// Where the WAV file is written
    #[arg(long, short, default_value = "recording.wav")]
    output: PathBuf,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn threshold(&self) -> EnergyThreshold {
        match (self.energy_threshold, self.start_threshold, self.end_threshold) {
            (Some(level), _, _) => EnergyThreshold::symmetric(level),
            (None, Some(start), Some(end)) => EnergyThreshold::split(start, end),
            _ => EnergyThreshold::symmetric(DEFAULT_ENERGY_THRESHOLD),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_recorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Audio Recorder v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        for device in CpalBackend::list_devices() {
            println!("{device}");
        }
        return Ok(());
    }

    let env = ComponentEnv::from_env().context("invalid component environment")?;
    let component = DeclaredComponent::audio_recorder(&env);
    match &component.source {
        ComponentSource::Build(path) => {
            println!("Widget {}: bundle at {}", component.name, path.display())
        }
        ComponentSource::DevServer(url) => {
            println!("Widget {}: dev server {}", component.name, url)
        }
    }

    let capture = CaptureConfig::new(
        args.threshold(),
        args.pause_threshold,
        args.sample_rate,
        args.auto_start,
    )
    .context("invalid capture settings")?;

    let backend = CpalBackend::new(args.device.clone());
    let pipeline = CapturePipeline::spawn(backend, capture, PipelineConfig::default());
    let mut state = pipeline.watch_state();

    println!("Press Enter to start or stop, Ctrl-C to discard.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                if line?.is_none() {
                    // stdin closed, keep what was captured
                    if pipeline.state().is_active() {
                        pipeline.stop().await?;
                    }
                    break;
                }
                match pipeline.state() {
                    CaptureState::Idle => pipeline.start().await?,
                    s if s.is_active() => {
                        pipeline.stop().await?;
                        break;
                    }
                    _ => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, discarding recording");
                if pipeline.state().is_active() {
                    pipeline.cancel().await?;
                }
                break;
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow().is_terminal() {
                    break;
                }
            }
        }
    }

    let Some(buffer) = pipeline.finish().await? else {
        println!("No recording.");
        return Ok(());
    };

    let wav = encode_wav(&buffer)?;
    std::fs::write(&args.output, &wav)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    println!(
        "Saved {:.2}s to {}",
        buffer.duration().as_secs_f64(),
        args.output.display()
    );
    Ok(())
}
