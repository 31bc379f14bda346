//! # DSP Backend
//!
//! The signal-processing primitives the masking pipeline is built from.
//!
//! ## Operations:
//! - **Pitch shift**: phase vocoder with frequency-bin shifting (length preserving)
//! - **Pre-emphasis**: first-order high-pass `y[n] = x[n] - coef * x[n-1]`
//! - **Normalize**: peak normalization to 1.0
//! - **Noise**: additive zero-mean Gaussian noise
//!
//! Everything takes a [`PcmBuffer`] by reference and hands back a new one.

use crate::audio::PcmBuffer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// STFT analysis/synthesis window size.
const WINDOW_SIZE: usize = 2048;

/// Hop size between successive STFT frames.
const HOP_SIZE: usize = 512;

/// Peaks below this are treated as silence and left alone by [`DspBackend::normalize`].
const SILENCE_THRESHOLD: f32 = f32::MIN_POSITIVE;

/// Errors from the DSP backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DspError {
    #[error("cannot {0} an empty signal")]
    EmptySignal(&'static str),

    #[error("invalid noise standard deviation: {0}")]
    InvalidNoise(f32),
}

/// Signal-processing capability used by the masking pipeline.
pub trait DspBackend: Send + Sync {
    /// Shift pitch by `semitones` without changing duration.
    fn pitch_shift(&self, buffer: &PcmBuffer, semitones: f64) -> Result<PcmBuffer, DspError>;

    /// Apply a pre-emphasis (high-pass) filter.
    fn preemphasis(&self, buffer: &PcmBuffer, coef: f32) -> PcmBuffer;

    /// Scale so that the peak absolute sample is 1.0.
    fn normalize(&self, buffer: &PcmBuffer) -> PcmBuffer;

    /// Add zero-mean Gaussian noise with the given standard deviation.
    fn add_noise(&self, buffer: &PcmBuffer, std_dev: f32) -> Result<PcmBuffer, DspError>;
}

/// Pure-Rust implementation over `rustfft` and `rand_distr`.
pub struct NativeDsp {
    rng: Mutex<StdRng>,
}

impl NativeDsp {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic noise, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for NativeDsp {
    fn default() -> Self {
        Self::new()
    }
}

impl DspBackend for NativeDsp {
    fn pitch_shift(&self, buffer: &PcmBuffer, semitones: f64) -> Result<PcmBuffer, DspError> {
        if buffer.is_empty() {
            return Err(DspError::EmptySignal("pitch-shift"));
        }
        if semitones.abs() < 1e-10 {
            return Ok(buffer.clone());
        }

        Ok(buffer.with_samples(phase_vocoder_shift(buffer.samples(), semitones)))
    }

    fn preemphasis(&self, buffer: &PcmBuffer, coef: f32) -> PcmBuffer {
        let samples = buffer.samples();
        let Some(&first) = samples.first() else {
            return buffer.clone();
        };

        // Linear extrapolation stands in for the sample before the first one.
        let before_first = match samples.get(1) {
            Some(&second) => 2.0 * first - second,
            None => first,
        };

        let mut previous = before_first;
        let filtered = samples
            .iter()
            .map(|&x| {
                let y = x - coef * previous;
                previous = x;
                y
            })
            .collect();

        buffer.with_samples(filtered)
    }

    fn normalize(&self, buffer: &PcmBuffer) -> PcmBuffer {
        let peak = buffer.peak();
        if peak < SILENCE_THRESHOLD {
            return buffer.clone();
        }
        buffer.with_samples(buffer.samples().iter().map(|s| s / peak).collect())
    }

    fn add_noise(&self, buffer: &PcmBuffer, std_dev: f32) -> Result<PcmBuffer, DspError> {
        // rand_distr only rejects non-finite deviations.
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(DspError::InvalidNoise(std_dev));
        }
        let normal = Normal::new(0.0f32, std_dev).map_err(|_| DspError::InvalidNoise(std_dev))?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let noisy = buffer
            .samples()
            .iter()
            .map(|&s| s + normal.sample(&mut *rng))
            .collect();

        Ok(buffer.with_samples(noisy))
    }
}

/// Zero-pad so every input sample sits under full window overlap.
///
/// `WINDOW_SIZE / 2` goes on each side (centered frames), then the tail is
/// extended until the padded length is one window plus a whole number of hops.
fn center_pad(samples: &[f32]) -> Vec<f64> {
    let edge = WINDOW_SIZE / 2;
    let centered = samples.len() + 2 * edge;
    let hops = (centered - WINDOW_SIZE).div_ceil(HOP_SIZE);
    let padded_len = WINDOW_SIZE + hops * HOP_SIZE;

    let mut padded = vec![0.0f64; padded_len];
    for (slot, &s) in padded[edge..].iter_mut().zip(samples) {
        *slot = s as f64;
    }
    padded
}

/// STFT -> frequency bin shifting -> ISTFT with overlap-add.
///
/// Runs on a centered, zero-padded copy of the input and trims back, so the
/// output has the same length as the input and its peak never exceeds the
/// input's.
fn phase_vocoder_shift(samples: &[f32], semitones: f64) -> Vec<f32> {
    let n = samples.len();
    let padded = center_pad(samples);
    let padded_len = padded.len();
    let shift_ratio = 2.0_f64.powf(semitones / 12.0);
    let half_window = WINDOW_SIZE / 2 + 1;

    let hann: Vec<f64> = (0..WINDOW_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / WINDOW_SIZE as f64).cos()))
        .collect();

    let mut output = vec![0.0f64; padded_len];
    let mut window_sum = vec![0.0f64; padded_len];

    let mut planner = FftPlanner::<f64>::new();
    let fft_forward = planner.plan_fft_forward(WINDOW_SIZE);
    let fft_inverse = planner.plan_fft_inverse(WINDOW_SIZE);

    let mut prev_phase = vec![0.0f64; half_window];
    let mut synth_phase = vec![0.0f64; half_window];

    let expected_phase_advance: Vec<f64> = (0..half_window)
        .map(|k| 2.0 * PI * k as f64 * HOP_SIZE as f64 / WINDOW_SIZE as f64)
        .collect();

    let num_frames = (padded_len - WINDOW_SIZE) / HOP_SIZE + 1;

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_SIZE;

        let mut spectrum: Vec<Complex<f64>> = (0..WINDOW_SIZE)
            .map(|i| Complex::new(padded[start + i] * hann[i], 0.0))
            .collect();
        fft_forward.process(&mut spectrum);

        let magnitudes: Vec<f64> = spectrum[..half_window].iter().map(|c| c.norm()).collect();
        let phases: Vec<f64> = spectrum[..half_window].iter().map(|c| c.im.atan2(c.re)).collect();

        // Instantaneous frequency per bin, phase deviation wrapped to [-pi, pi].
        let inst_freq: Vec<f64> = (0..half_window)
            .map(|k| {
                let deviation = phases[k] - prev_phase[k] - expected_phase_advance[k];
                let wrapped = deviation - (2.0 * PI) * (deviation / (2.0 * PI)).round();
                expected_phase_advance[k] + wrapped
            })
            .collect();

        // Move each bin; on collisions keep the louder one.
        let mut shifted_magnitudes = vec![0.0f64; half_window];
        let mut shifted_freq = vec![0.0f64; half_window];
        for k in 0..half_window {
            let target = (k as f64 * shift_ratio).round() as usize;
            if target < half_window && magnitudes[k] > shifted_magnitudes[target] {
                shifted_magnitudes[target] = magnitudes[k];
                shifted_freq[target] = inst_freq[k] * shift_ratio;
            }
        }

        for k in 0..half_window {
            synth_phase[k] += shifted_freq[k];
        }

        let mut synth: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); WINDOW_SIZE];
        for k in 0..half_window {
            synth[k] = Complex::from_polar(shifted_magnitudes[k], synth_phase[k]);
        }
        for k in 1..half_window - 1 {
            synth[WINDOW_SIZE - k] = synth[k].conj();
        }
        fft_inverse.process(&mut synth);

        // rustfft leaves the inverse unnormalized.
        let norm = 1.0 / WINDOW_SIZE as f64;
        for i in 0..WINDOW_SIZE {
            output[start + i] += synth[i].re * norm * hann[i];
            window_sum[start + i] += hann[i] * hann[i];
        }

        prev_phase.copy_from_slice(&phases);
    }

    // Drop the padding. Every kept sample is covered by at least three frames.
    let edge = WINDOW_SIZE / 2;
    let mut output: Vec<f64> = output[edge..edge + n]
        .iter()
        .zip(&window_sum[edge..edge + n])
        .map(|(&s, &ws)| s / ws)
        .collect();

    let input_peak = samples.iter().map(|s| s.abs() as f64).fold(0.0f64, f64::max);
    let output_peak = output.iter().map(|s| s.abs()).fold(0.0f64, f64::max);
    if output_peak > 1e-10 && output_peak > input_peak {
        let gain = input_peak / output_peak;
        output.iter_mut().for_each(|s| *s *= gain);
    }

    output.into_iter().map(|s| s as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f64, duration: f64, sample_rate: u32, amplitude: f32) -> PcmBuffer {
        let len = (duration * sample_rate as f64) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (2.0 * PI * freq * t).sin() as f32 * amplitude
            })
            .collect();
        PcmBuffer::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn test_pitch_shift_preserves_length_and_changes_audio() {
        let dsp = NativeDsp::with_seed(1);
        let original = sine(440.0, 1.0, 16000, 0.8);
        let shifted = dsp.pitch_shift(&original, 4.0).unwrap();

        assert_eq!(shifted.len(), original.len());
        assert_eq!(shifted.sample_rate(), original.sample_rate());
        let diff: f64 = original
            .samples()
            .iter()
            .zip(shifted.samples())
            .map(|(a, b)| ((a - b) as f64).powi(2))
            .sum();
        assert!(diff > 0.0, "Pitch-shifted audio should differ from original");
        assert!(shifted.peak() <= original.peak() + 1e-6);
    }

    #[test]
    fn test_pitch_shift_rejects_empty_signal() {
        let dsp = NativeDsp::new();
        let empty = PcmBuffer::new(Vec::new(), 16000).unwrap();
        assert_eq!(dsp.pitch_shift(&empty, 4.0), Err(DspError::EmptySignal("pitch-shift")));
    }

    fn energy(samples: &[f32]) -> f64 {
        samples.iter().map(|&s| (s as f64).powi(2)).sum()
    }

    #[test]
    fn test_pitch_shift_keeps_signal_edges() {
        let dsp = NativeDsp::new();
        let len = WINDOW_SIZE + HOP_SIZE - 1;
        let samples = (0..len)
            .map(|i| (2.0 * PI * 440.0 * i as f64 / 16000.0).sin() as f32 * 0.8)
            .collect();
        let input = PcmBuffer::new(samples, 16000).unwrap();

        let shifted = dsp.pitch_shift(&input, 4.0).unwrap();
        let out = shifted.samples();

        assert_eq!(out.len(), len);
        let head = &out[..HOP_SIZE];
        let tail = &out[len - HOP_SIZE..];
        assert!(energy(head) > 1e-3, "first hop went silent");
        assert!(energy(tail) > 1e-3, "last hop went silent");
        assert!(tail.iter().filter(|&&s| s == 0.0).count() < HOP_SIZE / 2);
    }

    #[test]
    fn test_pitch_shift_applies_to_sub_window_input() {
        let dsp = NativeDsp::new();
        let short = sine(440.0, 2000.0 / 16000.0, 16000, 0.5);
        assert_eq!(short.len(), 2000);

        let shifted = dsp.pitch_shift(&short, -2.0).unwrap();

        assert_eq!(shifted.len(), 2000);
        assert_ne!(shifted, short);
        assert!(energy(shifted.samples()) > 1e-3);
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let dsp = NativeDsp::new();
        let buffer = PcmBuffer::new(vec![0.1, -0.2, 0.3], 16000).unwrap();
        assert_eq!(dsp.pitch_shift(&buffer, 0.0).unwrap(), buffer);
    }

    #[test]
    fn test_preemphasis_filter() {
        let dsp = NativeDsp::new();
        let buffer = PcmBuffer::new(vec![1.0, 1.0, 1.0, 0.0], 8000).unwrap();
        let filtered = dsp.preemphasis(&buffer, 0.5);

        // Extrapolated previous sample for x[0] is 2*1.0 - 1.0 = 1.0.
        assert_eq!(filtered.samples(), &[0.5, 0.5, 0.5, -0.5]);
    }

    #[test]
    fn test_normalize_scales_peak_to_one() {
        let dsp = NativeDsp::new();
        let buffer = PcmBuffer::new(vec![0.1, -0.4, 0.2], 8000).unwrap();
        let normalized = dsp.normalize(&buffer);

        assert_relative_eq!(normalized.peak(), 1.0);
        assert_relative_eq!(normalized.samples()[0], 0.25);
        assert_relative_eq!(normalized.samples()[1], -1.0);
    }

    #[test]
    fn test_normalize_twice_is_a_fixed_point() {
        let dsp = NativeDsp::new();
        let buffer = sine(220.0, 0.1, 8000, 0.3);
        let once = dsp.normalize(&buffer);
        let twice = dsp.normalize(&once);

        assert_eq!(once.peak(), twice.peak());
        for (a, b) in once.samples().iter().zip(twice.samples()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_normalize_leaves_silence_alone() {
        let dsp = NativeDsp::new();
        let silence = PcmBuffer::new(vec![0.0; 32], 8000).unwrap();
        assert_eq!(dsp.normalize(&silence), silence);
    }

    #[test]
    fn test_noise_statistics() {
        let dsp = NativeDsp::with_seed(42);
        let silence = PcmBuffer::new(vec![0.0; 50_000], 16000).unwrap();
        let noisy = dsp.add_noise(&silence, 0.005).unwrap();

        let n = noisy.len() as f64;
        let mean = noisy.samples().iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = noisy.samples().iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;

        assert!(mean.abs() < 2e-4, "mean too far from zero: {mean}");
        assert_relative_eq!(variance.sqrt(), 0.005, max_relative = 0.05);
    }

    #[test]
    fn test_invalid_noise_rejected() {
        let dsp = NativeDsp::new();
        let buffer = PcmBuffer::new(vec![0.0; 4], 8000).unwrap();
        assert_eq!(dsp.add_noise(&buffer, -1.0), Err(DspError::InvalidNoise(-1.0)));
        assert!(matches!(
            dsp.add_noise(&buffer, f32::NAN),
            Err(DspError::InvalidNoise(_))
        ));
        assert!(dsp.add_noise(&buffer, 0.0).is_ok());
    }
}
