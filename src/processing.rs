//! # Voice Pipeline
//!
//! End-to-end processing of one upload:
//!
//! ```text
//! RawUpload -> FormatNormalizer -> MaskingPipeline -> PCM WAV -> EncryptionEnvelope (optional)
//! ```
//!
//! Everything here is synchronous and request-local; the HTTP layer runs it
//! on actix's blocking thread pool.

use crate::audio::wav::encode_wav;
use crate::audio::{DecodeError, FormatNormalizer, RawUpload};
use crate::envelope::EncryptionEnvelope;
use crate::masking::{DspError, MaskingPipeline, ProcessingOptions};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Failures from any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("voice masking failed: {0}")]
    Dsp(#[from] DspError),

    #[error("failed to encode WAV output: {0}")]
    Encode(#[from] hound::Error),
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct ProcessedVoice {
    /// WAV bytes, or the Fernet token bytes when `encrypted`.
    pub bytes: Vec<u8>,
    pub encrypted: bool,
    pub sample_rate: u32,
    pub samples: usize,
    /// Name of the decode strategy that produced the audio.
    pub strategy: &'static str,
}

pub struct VoicePipeline {
    normalizer: FormatNormalizer,
    masking: MaskingPipeline,
    envelope: Arc<EncryptionEnvelope>,
}

impl VoicePipeline {
    pub fn new(normalizer: FormatNormalizer, masking: MaskingPipeline, envelope: Arc<EncryptionEnvelope>) -> Self {
        Self {
            normalizer,
            masking,
            envelope,
        }
    }

    pub fn process(&self, upload: &RawUpload, options: &ProcessingOptions) -> Result<ProcessedVoice, PipelineError> {
        let outcome = self.normalizer.normalize(upload)?;
        let masked = self.masking.apply(outcome.buffer, options)?;
        let wav = encode_wav(&masked)?;

        let bytes = if options.encrypt { self.envelope.encrypt(&wav) } else { wav };

        info!(
            format = %upload.format,
            strategy = outcome.strategy,
            sample_rate = masked.sample_rate(),
            duration_secs = masked.duration_seconds(),
            encrypted = options.encrypt,
            output_bytes = bytes.len(),
            "Voice processed"
        );

        Ok(ProcessedVoice {
            bytes,
            encrypted: options.encrypt,
            sample_rate: masked.sample_rate(),
            samples: masked.len(),
            strategy: outcome.strategy,
        })
    }
}
