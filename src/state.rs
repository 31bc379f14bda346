//! # Application State Management
//!
//! Everything shared between request handlers lives in [`AppState`], which
//! actix clones into every worker.
//!
//! ## What's Shared:
//! - **Config**: Read-only after startup, so a plain `Arc`
//! - **Envelope**: Holds the process key, written once when the state is built
//! - **Pipeline**: Stateless apart from the DSP noise generator
//! - **Metrics**: Updated by every request, so `Arc<RwLock<_>>`
//!
//! Lock poisoning is ignored: a panic halfway through bumping a counter
//! leaves nothing worth protecting.

use crate::audio::decoder::{SymphoniaDecoder, SymphoniaStreamingDecoder};
use crate::audio::transcoder::{FfmpegTranscoder, Transcoder};
use crate::audio::FormatNormalizer;
use crate::config::AppConfig;
use crate::envelope::{EncryptionEnvelope, ProcessKey};
use crate::masking::{DspBackend, MaskingPipeline, NativeDsp};
use crate::processing::VoicePipeline;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub pipeline: Arc<VoicePipeline>,
    pub envelope: Arc<EncryptionEnvelope>,
    /// Location of the ffmpeg executable in use, if any.
    pub transcoder_path: Option<String>,
    pub start_time: Instant,
}

/// Counters collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub voices_processed: u64,
    pub encrypted_outputs: u64,
    pub decode_failures: u64,
    pub decrypt_failures: u64,
    /// How often each decode strategy produced the audio, keyed by strategy name.
    pub decode_strategies: HashMap<String, u64>,
    /// Key: "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state for a running server.
    ///
    /// ## Startup Work:
    /// 1. Locate ffmpeg (unless disabled); absence is a warning, not an error
    /// 2. Generate the process key
    /// 3. Wire decoders, transcoder, DSP and envelope into the voice pipeline
    pub fn new(config: AppConfig) -> Self {
        let transcoder = if config.transcoder.enabled {
            FfmpegTranscoder::locate(config.transcoder_path().as_deref(), config.transcoder_timeout())
        } else {
            info!("Transcoder disabled by configuration");
            None
        };

        match &transcoder {
            Some(found) => match found.version() {
                Some(version) => info!("ffmpeg available at {}: {}", found.executable().display(), version),
                None => warn!(
                    "ffmpeg at {} did not answer -version; transcoding may fail",
                    found.executable().display()
                ),
            },
            None => warn!("ffmpeg not available; WebM/MP3/M4A uploads will use the streaming decoder only"),
        }

        let transcoder_path = transcoder.as_ref().map(|t| t.executable().display().to_string());
        let transcoder = transcoder.map(|t| Arc::new(t) as Arc<dyn Transcoder>);

        Self::assemble(config, transcoder, transcoder_path, Arc::new(NativeDsp::new()))
    }

    /// Build the state from explicit components.
    pub fn assemble(
        config: AppConfig,
        transcoder: Option<Arc<dyn Transcoder>>,
        transcoder_path: Option<String>,
        dsp: Arc<dyn DspBackend>,
    ) -> Self {
        let envelope = Arc::new(EncryptionEnvelope::new(ProcessKey::generate()));
        let normalizer = FormatNormalizer::new(
            Arc::new(SymphoniaDecoder),
            Arc::new(SymphoniaStreamingDecoder),
            transcoder,
        );
        let masking = MaskingPipeline::new(dsp, config.masking.clone());
        let pipeline = Arc::new(VoicePipeline::new(normalizer, masking, envelope.clone()));

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline,
            envelope,
            transcoder_path,
            start_time: Instant::now(),
        }
    }

    pub fn transcoder_available(&self) -> bool {
        self.transcoder_path.is_some()
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Record a successfully processed voice and the strategy that decoded it.
    pub fn record_voice_processed(&self, strategy: &str, encrypted: bool) {
        let mut metrics = self.metrics_write();
        metrics.voices_processed += 1;
        if encrypted {
            metrics.encrypted_outputs += 1;
        }
        *metrics.decode_strategies.entry(strategy.to_string()).or_default() += 1;
    }

    pub fn record_decode_failure(&self) {
        self.metrics_write().decode_failures += 1;
    }

    pub fn record_decrypt_failure(&self) {
        self.metrics_write().decrypt_failures += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;

    #[test]
    fn test_voice_metrics_accumulate() {
        let state = test_state(AppConfig::default());

        state.record_voice_processed("transcoder", true);
        state.record_voice_processed("streaming", false);
        state.record_voice_processed("streaming", true);
        state.record_decrypt_failure();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.voices_processed, 3);
        assert_eq!(metrics.encrypted_outputs, 2);
        assert_eq!(metrics.decode_strategies["streaming"], 2);
        assert_eq!(metrics.decode_strategies["transcoder"], 1);
        assert_eq!(metrics.decrypt_failures, 1);
        assert!(!state.transcoder_available());
    }

    #[test]
    fn test_endpoint_metric_rates() {
        let state = test_state(AppConfig::default());
        state.record_endpoint_request("POST /api/process-voice", 30, false);
        state.record_endpoint_request("POST /api/process-voice", 10, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["POST /api/process-voice"];
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().error_rate(), 0.0);
    }
}
