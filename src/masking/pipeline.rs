//! # Masking Pipeline
//!
//! Runs a decoded buffer through up to two stages, each toggled per request:
//!
//! 1. **Pitch stage** (`pitch_shift_enabled`): shift by the caller's
//!    `pitch_steps`, pre-emphasis, peak normalize
//! 2. **Masking stage** (`ai_masking_enabled`): fixed downward shift, Gaussian
//!    noise, peak normalize
//!
//! With both stages off the buffer comes back unchanged.

use crate::audio::PcmBuffer;
use crate::config::MaskingConfig;
use crate::masking::dsp::{DspBackend, DspError};
use std::sync::Arc;
use tracing::debug;

/// Per-request processing switches, read-only once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub pitch_shift_enabled: bool,
    /// Signed semitones for the pitch stage.
    pub pitch_steps: i32,
    pub ai_masking_enabled: bool,
    pub encrypt: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            pitch_shift_enabled: true,
            pitch_steps: 4,
            ai_masking_enabled: true,
            encrypt: true,
        }
    }
}

/// Composes [`DspBackend`] calls according to [`ProcessingOptions`].
#[derive(Clone)]
pub struct MaskingPipeline {
    dsp: Arc<dyn DspBackend>,
    settings: MaskingConfig,
}

impl MaskingPipeline {
    pub fn new(dsp: Arc<dyn DspBackend>, settings: MaskingConfig) -> Self {
        Self { dsp, settings }
    }

    /// Apply the enabled stages in order and return the masked buffer.
    ///
    /// Errors only come from the DSP backend, in practice when the decoded
    /// buffer is empty and a pitch shift is requested.
    pub fn apply(&self, buffer: PcmBuffer, options: &ProcessingOptions) -> Result<PcmBuffer, DspError> {
        let mut current = buffer;

        if options.pitch_shift_enabled {
            debug!(semitones = options.pitch_steps, "Applying pitch stage");
            current = self.dsp.pitch_shift(&current, f64::from(options.pitch_steps))?;
            current = self.dsp.preemphasis(&current, self.settings.preemphasis_coef);
            current = self.dsp.normalize(&current);
        }

        if options.ai_masking_enabled {
            debug!(
                semitones = self.settings.masking_semitones,
                noise_std = self.settings.noise_std,
                "Applying masking stage"
            );
            current = self.dsp.pitch_shift(&current, self.settings.masking_semitones)?;
            current = self.dsp.add_noise(&current, self.settings.noise_std)?;
            current = self.dsp.normalize(&current);
        }

        Ok(current)
    }
}
