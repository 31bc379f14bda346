//! # Audio Ingest Module
//!
//! Turns an uploaded recording of arbitrary container/codec into one canonical
//! representation that the masking pipeline can work with.
//!
//! ## Key Components:
//! - **Format**: Claimed format tag derived from the upload's filename
//! - **Decoder**: Primary (whole-file) and streaming (frame-wise) decode capabilities
//! - **Frames**: Raw PCM frame interpretation with sample-width probing
//! - **Transcoder**: External `ffmpeg` process used for containers we can't read directly
//! - **Normalizer**: The decode cascade tying all of the above together
//! - **Wav**: Serialization of the final samples back into a PCM WAV container
//!
//! ## Canonical Representation:
//! - **Samples**: 32-bit float, mono (multi-channel input is averaged)
//! - **Sample Rate**: Whatever the source declared (never resampled)

pub mod decoder;      // Primary and streaming decode capabilities
pub mod format;       // Format tags and decode routing
pub mod frames;       // Raw PCM frame interpretation
pub mod normalizer;   // Cascading decode strategies
pub mod transcoder;   // External transcoder capability
pub mod wav;          // PCM WAV serialization

pub use format::AudioFormat;
pub use normalizer::{DecodeError, FormatNormalizer, NormalizeOutcome, StrategyFailure};

use thiserror::Error;

/// Errors raised when constructing a [`PcmBuffer`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcmError {
    #[error("sample rate must be greater than 0")]
    ZeroSampleRate,
}

/// Decoded mono audio: float samples paired with their sample rate.
///
/// ## Invariants:
/// - `sample_rate > 0` (enforced by [`PcmBuffer::new`])
/// - An empty sample vector is legal, but nothing downstream can do much with it
///
/// Pipeline stages never mutate a buffer in place; each one hands back a new
/// `PcmBuffer` built with [`PcmBuffer::with_samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, PcmError> {
        if sample_rate == 0 {
            return Err(PcmError::ZeroSampleRate);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Build a new buffer at the same sample rate with different samples.
    pub fn with_samples(&self, samples: Vec<f32>) -> Self {
        Self {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value (0.0 for an empty buffer).
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// An uploaded recording plus the format its filename claims it is.
///
/// ## Trust Assumption:
/// The format tag is taken at face value. Nothing here checks that the bytes
/// actually are what the extension says; the decoders find out the hard way.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl RawUpload {
    pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self { bytes, format }
    }

    /// Build an upload from the multipart filename (if any).
    ///
    /// Missing filenames and filenames without an extension fall back to
    /// `default_format`.
    pub fn from_filename(bytes: Vec<u8>, filename: Option<&str>, default_format: &AudioFormat) -> Self {
        let format = AudioFormat::from_filename(filename).unwrap_or_else(|| default_format.clone());
        Self { bytes, format }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
