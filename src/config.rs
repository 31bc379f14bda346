//! # Configuration Management
//!
//! Loads the service configuration from several sources, lowest priority first:
//! 1. Default values (the `Default` impl below)
//! 2. Configuration file (`config.toml`, optional)
//! 3. Environment variables with the `APP` prefix and `__` as separator
//!    (`APP__SERVER__PORT=9000`, `APP__TRANSCODER__PATH=/opt/ffmpeg/bin/ffmpeg`)
//! 4. The bare `HOST` and `PORT` variables most deployment platforms set
//!
//! ## Sections:
//! - **server**: Bind address
//! - **audio**: Upload limits and the format assumed for extension-less uploads
//! - **transcoder**: Where to find ffmpeg and how long to wait for it
//! - **masking**: Constants used by the masking pipeline
//! - **security**: Whether the process key may be handed out over HTTP

use crate::audio::AudioFormat;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transcoder: TranscoderConfig,
    pub masking: MaskingConfig,
    pub security: SecurityConfig,
}

/// Server bind settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections on every interface (the default)
/// - `host = "127.0.0.1"`: Local development only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Format tag assumed when the upload has no usable file extension.
    pub default_format: String,
    /// Largest accepted multipart file part, in bytes.
    pub max_upload_bytes: usize,
}

/// External transcoder (ffmpeg) settings.
///
/// When `path` is unset the executable is searched for on `PATH`. Setting
/// `enabled = false` skips the transcoder entirely, leaving only the
/// streaming decoder for WebM/MP3/M4A uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub enabled: bool,
    pub path: Option<String>,
    pub timeout_secs: u64,
}

/// Masking pipeline constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    /// Pre-emphasis filter coefficient, applied after the user pitch shift.
    pub preemphasis_coef: f32,
    /// Fixed pitch shift of the masking stage, in semitones.
    pub masking_semitones: f64,
    /// Standard deviation of the Gaussian noise added by the masking stage.
    pub noise_std: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Serve the process key from `GET /api/get-key`.
    pub expose_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            audio: AudioConfig {
                default_format: "webm".to_string(),
                max_upload_bytes: 50 * 1024 * 1024,
            },
            transcoder: TranscoderConfig {
                enabled: true,
                path: None,
                timeout_secs: 30,
            },
            masking: MaskingConfig::default(),
            security: SecurityConfig { expose_key: true },
        }
    }
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            preemphasis_coef: 0.97,
            masking_semitones: -2.0,
            noise_std: 0.005,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config::File::with_name("config").required(false))
    }

    /// Same as [`AppConfig::load`] with an explicit file source.
    pub fn load_from<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.audio.max_upload_bytes == 0 {
            return Err(anyhow!("Max upload size must be greater than 0"));
        }

        if self.audio.default_format.trim().is_empty() {
            return Err(anyhow!("Default audio format cannot be empty"));
        }

        if self.transcoder.timeout_secs == 0 {
            return Err(anyhow!("Transcoder timeout must be greater than 0"));
        }

        let noise = self.masking.noise_std;
        if !noise.is_finite() || noise < 0.0 {
            return Err(anyhow!("Noise standard deviation must be a finite value >= 0, got {}", noise));
        }

        let coef = self.masking.preemphasis_coef;
        if !(0.0..1.0).contains(&coef) {
            return Err(anyhow!("Pre-emphasis coefficient must be in [0, 1), got {}", coef));
        }

        if !self.masking.masking_semitones.is_finite() {
            return Err(anyhow!("Masking pitch shift must be finite"));
        }

        Ok(())
    }

    pub fn default_format(&self) -> AudioFormat {
        AudioFormat::from_tag(&self.audio.default_format)
    }

    pub fn transcoder_path(&self) -> Option<PathBuf> {
        self.transcoder.path.as_ref().map(PathBuf::from)
    }

    pub fn transcoder_timeout(&self) -> Duration {
        Duration::from_secs(self.transcoder.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.default_format(), AudioFormat::Webm);
        assert_eq!(config.masking.noise_std, 0.005);
        assert!(config.security.expose_key);
        assert!(config.transcoder_path().is_none());
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_port(|c: &mut AppConfig| c.server.port = 0)]
    #[case::zero_upload(|c: &mut AppConfig| c.audio.max_upload_bytes = 0)]
    #[case::blank_format(|c: &mut AppConfig| c.audio.default_format = "  ".to_string())]
    #[case::zero_timeout(|c: &mut AppConfig| c.transcoder.timeout_secs = 0)]
    #[case::negative_noise(|c: &mut AppConfig| c.masking.noise_std = -0.1)]
    #[case::nan_noise(|c: &mut AppConfig| c.masking.noise_std = f32::NAN)]
    #[case::coef_too_large(|c: &mut AppConfig| c.masking.preemphasis_coef = 1.0)]
    #[case::infinite_shift(|c: &mut AppConfig| c.masking.masking_semitones = f64::INFINITY)]
    fn test_config_validation(#[case] mutate: fn(&mut AppConfig)) {
        let mut config = AppConfig::default();
        mutate(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[masking]\nnoise_std = 0.01\n\n[transcoder]\npath = \"/opt/ffmpeg\"\ntimeout_secs = 5\n\n[security]\nexpose_key = false"
        )
        .unwrap();

        let config = AppConfig::load_from(config::File::from(file.path())).unwrap();

        assert_eq!(config.masking.noise_std, 0.01);
        assert_eq!(config.masking.preemphasis_coef, 0.97);
        assert_eq!(config.transcoder_path(), Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(config.transcoder_timeout(), Duration::from_secs(5));
        assert!(!config.security.expose_key);
    }
}
