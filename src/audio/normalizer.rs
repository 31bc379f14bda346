//! # Format Normalizer
//!
//! Turns a [`RawUpload`] into a mono [`PcmBuffer`], picking decode strategies
//! based on the claimed format.
//!
//! ## Routes:
//! - **Direct** (`wav`, `flac`, `ogg`): one shot with the primary decoder. If it
//!   fails there is nothing else worth trying.
//! - **Transcode** (`webm`, `mp3`, `m4a`, `mp4`, `aac`, anything unknown): an
//!   ordered cascade, stopping at the first success:
//!   1. `transcoder`: external ffmpeg to WAV, then the primary decoder
//!   2. `streaming`: frame-wise decode with sample-width probing
//!
//! Every failed attempt is recorded. On success the recorded failures come back
//! in [`NormalizeOutcome::failures`]; when everything fails they end up in the
//! [`DecodeError`] along with a hint on what to install.

use crate::audio::decoder::{AudioDecoder, StreamingDecoder};
use crate::audio::format::{AudioFormat, DecodeRoute};
use crate::audio::frames::decode_frame;
use crate::audio::transcoder::Transcoder;
use crate::audio::{PcmBuffer, RawUpload};
use anyhow::{anyhow, Context};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Shown to the user when no strategy could decode a transcode-route upload.
pub const REMEDIATION_HINT: &str = "Install ffmpeg and make sure it is on PATH \
(Linux: `sudo apt-get install ffmpeg`, macOS: `brew install ffmpeg`, \
Windows: `choco install ffmpeg`), or point `transcoder.path` at the binary, then restart the server.";

/// Reason recorded when the transcoder strategy has no executable to run.
pub const TRANSCODER_NOT_FOUND: &str = "transcoder not found (ffmpeg is not installed or not on PATH)";

/// One failed decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// No decode strategy produced audio.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    format: AudioFormat,
    attempted: Vec<StrategyFailure>,
    hint: Option<&'static str>,
    message: String,
}

impl DecodeError {
    fn empty(format: &AudioFormat) -> Self {
        Self {
            format: format.clone(),
            attempted: Vec::new(),
            hint: None,
            message: format!("Could not process {} file: uploaded audio is empty", format),
        }
    }

    pub(crate) fn exhausted(format: &AudioFormat, attempted: Vec<StrategyFailure>, hint: Option<&'static str>) -> Self {
        let message = match (attempted.as_slice(), hint) {
            ([only], None) => format!("Could not load {} file: {}", format, only.reason),
            _ => {
                let mut message = format!("Could not process {} file.\n\nErrors:\n", format);
                for failure in &attempted {
                    message.push_str(&format!("- {}\n", failure));
                }
                if let Some(hint) = hint {
                    message.push_str(&format!("\nSolution: {}", hint));
                }
                message
            }
        };

        Self {
            format: format.clone(),
            attempted,
            hint,
            message,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Every strategy that was tried, with its failure reason, in order.
    pub fn attempted(&self) -> &[StrategyFailure] {
        &self.attempted
    }

    pub fn hint(&self) -> Option<&'static str> {
        self.hint
    }
}

/// A successful normalization.
#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub buffer: PcmBuffer,
    /// Name of the strategy that produced `buffer`.
    pub strategy: &'static str,
    /// Strategies that failed before the successful one.
    pub failures: Vec<StrategyFailure>,
}

/// One entry in a decode cascade.
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self, upload: &RawUpload) -> anyhow::Result<PcmBuffer>;
}

/// Primary decoder on the raw bytes.
pub struct DirectStrategy {
    decoder: Arc<dyn AudioDecoder>,
}

impl DecodeStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "decoder"
    }

    fn attempt(&self, upload: &RawUpload) -> anyhow::Result<PcmBuffer> {
        Ok(self.decoder.decode(&upload.bytes, &upload.format)?)
    }
}

/// External transcoder to WAV, then the primary decoder.
pub struct TranscoderStrategy {
    transcoder: Option<Arc<dyn Transcoder>>,
    decoder: Arc<dyn AudioDecoder>,
}

impl DecodeStrategy for TranscoderStrategy {
    fn name(&self) -> &'static str {
        "transcoder"
    }

    fn attempt(&self, upload: &RawUpload) -> anyhow::Result<PcmBuffer> {
        let transcoder = self.transcoder.as_ref().ok_or_else(|| anyhow!(TRANSCODER_NOT_FOUND))?;

        let wav = transcoder.transcode(&upload.bytes, &upload.format)?;
        debug!("Transcoded {} to WAV: {} bytes", upload.format, wav.len());

        let buffer = self
            .decoder
            .decode(&wav, &AudioFormat::Wav)
            .context("transcoded WAV could not be decoded")?;
        Ok(buffer)
    }
}

/// Frame-wise streaming decode; no external process needed.
pub struct StreamingStrategy {
    streaming: Arc<dyn StreamingDecoder>,
}

impl DecodeStrategy for StreamingStrategy {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn attempt(&self, upload: &RawUpload) -> anyhow::Result<PcmBuffer> {
        let mut source = self.streaming.open(&upload.bytes, &upload.format)?;
        let sample_rate = source.sample_rate();
        let channels = source.channels();

        let mut samples = Vec::new();
        let mut frame_index = 0usize;
        while let Some(frame) = source.next_frame()? {
            let mono = decode_frame(&frame, channels).with_context(|| format!("frame {}", frame_index))?;
            samples.extend(mono);
            frame_index += 1;
        }

        if samples.is_empty() {
            return Err(anyhow!("stream yielded no audio samples"));
        }

        Ok(PcmBuffer::new(samples, sample_rate)?)
    }
}

/// Selects and sequences decode strategies for an upload.
pub struct FormatNormalizer {
    direct: Vec<Box<dyn DecodeStrategy>>,
    cascade: Vec<Box<dyn DecodeStrategy>>,
}

impl FormatNormalizer {
    /// Wire up the standard routes.
    ///
    /// `transcoder` is `None` when no ffmpeg was found at startup; the
    /// transcoder strategy then records that and steps aside.
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        streaming: Arc<dyn StreamingDecoder>,
        transcoder: Option<Arc<dyn Transcoder>>,
    ) -> Self {
        Self {
            direct: vec![Box::new(DirectStrategy {
                decoder: decoder.clone(),
            })],
            cascade: vec![
                Box::new(TranscoderStrategy { transcoder, decoder }),
                Box::new(StreamingStrategy { streaming }),
            ],
        }
    }

    pub fn normalize(&self, upload: &RawUpload) -> Result<NormalizeOutcome, DecodeError> {
        if upload.is_empty() {
            warn!("Rejecting empty {} upload", upload.format);
            return Err(DecodeError::empty(&upload.format));
        }

        match upload.format.route() {
            DecodeRoute::Direct => run_strategies(&self.direct, upload, None),
            DecodeRoute::Transcode => run_strategies(&self.cascade, upload, Some(REMEDIATION_HINT)),
        }
    }
}

fn run_strategies(
    strategies: &[Box<dyn DecodeStrategy>],
    upload: &RawUpload,
    hint: Option<&'static str>,
) -> Result<NormalizeOutcome, DecodeError> {
    let mut failures = Vec::new();

    for strategy in strategies {
        debug!(strategy = strategy.name(), format = %upload.format, "Trying decode strategy");

        match strategy.attempt(upload) {
            Ok(buffer) => {
                info!(
                    strategy = strategy.name(),
                    format = %upload.format,
                    samples = buffer.len(),
                    sample_rate = buffer.sample_rate(),
                    "Audio decoded"
                );
                return Ok(NormalizeOutcome {
                    buffer,
                    strategy: strategy.name(),
                    failures,
                });
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!(strategy = strategy.name(), format = %upload.format, "Decode strategy failed: {}", reason);
                failures.push(StrategyFailure {
                    strategy: strategy.name(),
                    reason,
                });
            }
        }
    }

    Err(DecodeError::exhausted(&upload.format, failures, hint))
}
