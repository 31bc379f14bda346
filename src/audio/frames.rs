//! # Raw PCM Frame Interpretation
//!
//! The streaming decoder hands us frames of raw little-endian PCM bytes but
//! does not reliably tell us the sample width. This module guesses it.
//!
//! ## Probing Order:
//! 1. **i16**: the common case, scaled by 1/32768
//! 2. **i32**: scaled by 1/2147483648
//! 3. **f32**: passed through untouched
//!
//! A width is rejected only on structural grounds (the byte count isn't a
//! whole number of samples). That makes this a best-effort heuristic: a
//! 32-bit stream with an even byte count will happily parse as i16 noise.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Errors raised while turning a raw frame into mono samples.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes is not a whole number of {width}-byte samples")]
    Misaligned { len: usize, width: usize },

    #[error("frame of {samples} samples cannot be split into {channels} channels")]
    ChannelMismatch { samples: usize, channels: usize },

    #[error("stream declares zero channels")]
    ZeroChannels,
}

/// Candidate sample encodings for a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    I16,
    I32,
    F32,
}

impl SampleWidth {
    /// Order in which widths are tried; most common first.
    pub const PROBE_ORDER: [SampleWidth; 3] = [SampleWidth::I16, SampleWidth::I32, SampleWidth::F32];

    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::I16 => 2,
            SampleWidth::I32 => 4,
            SampleWidth::F32 => 4,
        }
    }

    /// Decode `data` as this width, scaling integers into [-1.0, 1.0).
    pub fn decode(self, data: &[u8]) -> Result<Vec<f32>, FrameError> {
        let width = self.bytes();
        if data.len() % width != 0 {
            return Err(FrameError::Misaligned {
                len: data.len(),
                width,
            });
        }

        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / width);

        match self {
            SampleWidth::I16 => {
                while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                    samples.push(sample as f32 / 32768.0);
                }
            }
            SampleWidth::I32 => {
                while let Ok(sample) = cursor.read_i32::<LittleEndian>() {
                    samples.push((sample as f64 / 2_147_483_648.0) as f32);
                }
            }
            SampleWidth::F32 => {
                while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
                    samples.push(sample);
                }
            }
        }

        Ok(samples)
    }
}

/// Interpret a raw frame by trying each width in [`SampleWidth::PROBE_ORDER`].
///
/// Returns the width that parsed along with the samples, or the error from
/// the last width tried.
pub fn interpret_frame(data: &[u8]) -> Result<(SampleWidth, Vec<f32>), FrameError> {
    let mut last_error = FrameError::Misaligned {
        len: data.len(),
        width: SampleWidth::I16.bytes(),
    };

    for width in SampleWidth::PROBE_ORDER {
        match width.decode(data) {
            Ok(samples) => return Ok((width, samples)),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}

/// Average interleaved samples across channels.
///
/// A sample count that isn't a multiple of `channels` means the frame is
/// malformed; we refuse it rather than silently dropping the tail.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Result<Vec<f32>, FrameError> {
    if channels == 0 {
        return Err(FrameError::ZeroChannels);
    }
    if channels == 1 {
        return Ok(samples.to_vec());
    }
    if samples.len() % channels != 0 {
        return Err(FrameError::ChannelMismatch {
            samples: samples.len(),
            channels,
        });
    }

    Ok(samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Full treatment for one streamed frame: probe the width, then collapse to mono.
pub fn decode_frame(data: &[u8], channels: usize) -> Result<Vec<f32>, FrameError> {
    let (_, samples) = interpret_frame(data)?;
    downmix_to_mono(&samples, channels)
}
