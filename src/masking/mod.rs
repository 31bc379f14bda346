//! # Voice Masking Module
//!
//! Alters a decoded recording so the speaker is harder to recognize.
//!
//! ## Key Components:
//! - **DSP**: Pitch shift, pre-emphasis, peak normalization and noise ([`dsp`])
//! - **Pipeline**: The two toggleable masking stages built on top ([`pipeline`])
//!
//! This is obfuscation, not anonymization: nothing here models the speaker.

pub mod dsp;       // Signal-processing backend
pub mod pipeline;  // Option-driven masking stages

pub use dsp::{DspBackend, DspError, NativeDsp};
pub use pipeline::{MaskingPipeline, ProcessingOptions};
