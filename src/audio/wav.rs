//! WAV encoding of finished recordings
//!
//! 16-bit signed PCM, interleaved, at the buffer's own rate and channel count.

use super::buffer::AudioBuffer;
use std::io::Cursor;
use thiserror::Error;

/// Encoding failure; the buffer is only borrowed so the caller can retry
#[derive(Error, Debug)]
pub enum WavError {
    #[error("unsupported format: {sample_rate}Hz, {channels} channel(s)")]
    InvalidFormat { sample_rate: u32, channels: u16 },

    #[error("WAV encoding failed: {0}")]
    Encoding(#[from] hound::Error),
}

/// Encodes a buffer as a complete RIFF/WAVE file in memory
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>, WavError> {
    if buffer.sample_rate() == 0 || buffer.channels() == 0 {
        return Err(WavError::InvalidFormat {
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
        });
    }

    let spec = hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in buffer.samples() {
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }
        writer.finalize()?;
    }

    let data = cursor.into_inner();
    tracing::debug!(
        "Encoded {} frames into {} WAV bytes",
        buffer.frames(),
        data.len()
    );
    Ok(data)
}
