//! # Configuration
//!
//! Capture, detector and transform settings. Every field has a default that
//! reproduces the guitar setup (44.1 kHz, 4096-sample chunks, E2 + 49 bins),
//! so a config file only needs the values it changes.
//!
//! The onset and sustain thresholds were tuned by ear for one guitar and one
//! microphone. Treat them as starting points, not constants.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::tuning;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub transform: TransformConfig,
}

/// Input device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Exact input device name; `None` selects the host default.
    pub device_name: Option<String>,
    /// Sample rate in Hz, shared by capture and transform.
    pub sample_rate: u32,
    /// Samples per delivered chunk.
    pub chunk_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: 44_100,
            chunk_size: 4096,
        }
    }
}

/// Onset/offset thresholds, in mean absolute i16 sample units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rise in chunk magnitude over the previous chunk that marks an onset.
    pub onset_delta: f32,
    /// Chunks louder than this are part of the note; anything at or below
    /// it ends the note.
    pub sustain_threshold: f32,
    /// Seconds after capture start during which chunks are discarded.
    pub warmup_secs: f32,
    /// Force-close a note after this many accumulated chunks.
    pub max_note_chunks: Option<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            onset_delta: 300.0,
            sustain_threshold: 500.0,
            warmup_secs: 0.5,
            max_note_chunks: None,
        }
    }
}

impl DetectorConfig {
    /// Warm-up window as a `Duration`.
    ///
    /// Values `validate` would reject saturate instead of panicking:
    /// negative or NaN becomes zero, anything too large becomes
    /// `Duration::MAX`.
    pub fn warmup(&self) -> Duration {
        if self.warmup_secs.is_nan() || self.warmup_secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f32(self.warmup_secs).unwrap_or(Duration::MAX)
    }
}

/// Constant-Q bin grid. The note table is built from the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Samples between successive analysis frames.
    pub hop_length: usize,
    /// Lowest bin, as a note name.
    pub fmin_note: String,
    pub n_bins: usize,
    pub bins_per_octave: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            hop_length: 2048,
            fmin_note: "E2".to_string(),
            n_bins: 49,
            bins_per_octave: 12,
        }
    }
}

impl TransformConfig {
    /// Lowest bin frequency in Hz.
    pub fn fmin_hz(&self) -> Result<f32, ConfigError> {
        tuning::note_to_hz(&self.fmin_note)
    }

    /// Checks the grid against a sample rate.
    pub fn validate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        if self.hop_length == 0 {
            return Err(ConfigError::invalid("hop_length", "must be > 0"));
        }
        if self.n_bins == 0 {
            return Err(ConfigError::invalid("n_bins", "must be > 0"));
        }
        if self.bins_per_octave == 0 {
            return Err(ConfigError::invalid("bins_per_octave", "must be > 0"));
        }
        if sample_rate == 0 {
            return Err(ConfigError::invalid("sample_rate", "must be > 0"));
        }

        let fmin = self.fmin_hz()?;
        let top_hz = fmin * 2.0_f32.powf((self.n_bins - 1) as f32 / self.bins_per_octave as f32);
        let nyquist_hz = sample_rate as f32 / 2.0;
        if top_hz >= nyquist_hz {
            return Err(ConfigError::NyquistExceeded { top_hz, nyquist_hz });
        }
        Ok(())
    }
}

impl Config {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size", "must be > 0"));
        }
        if Duration::try_from_secs_f32(self.detector.warmup_secs).is_err() {
            return Err(ConfigError::invalid(
                "warmup_secs",
                "must be a non-negative number of seconds that fits a Duration",
            ));
        }
        if self.detector.max_note_chunks == Some(0) {
            return Err(ConfigError::invalid("max_note_chunks", "must be > 0 when set"));
        }
        self.transform.validate(self.capture.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_reproduce_guitar_setup() {
        let config = Config::default();
        assert_eq!(config.capture.sample_rate, 44_100);
        assert_eq!(config.capture.chunk_size, 4096);
        assert_eq!(config.detector.onset_delta, 300.0);
        assert_eq!(config.detector.sustain_threshold, 500.0);
        assert_eq!(config.detector.warmup(), Duration::from_millis(500));
        assert_eq!(config.transform.hop_length, 2048);
        assert_eq!(config.transform.n_bins, 49);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "detector": {{ "sustain_threshold": 650 }}, "capture": {{ "device_name": "Scarlett 2i2 USB" }} }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.detector.sustain_threshold, 650.0);
        assert_eq!(config.detector.onset_delta, 300.0);
        assert_eq!(config.capture.device_name.as_deref(), Some("Scarlett 2i2 USB"));
        assert_eq!(config.transform, TransformConfig::default());
    }

    #[test]
    fn rejects_bins_above_nyquist() {
        let config = Config {
            capture: CaptureConfig {
                sample_rate: 2_000,
                ..CaptureConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NyquistExceeded { .. })
        ));
    }

    #[test]
    fn rejects_zero_sized_parameters() {
        let mut config = Config::default();
        config.transform.hop_length = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "hop_length", .. })
        ));

        let mut config = Config::default();
        config.capture.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detector.max_note_chunks = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_warmup_outside_duration_range() {
        for secs in [1e30, f32::INFINITY, f32::NAN, -0.1] {
            let mut config = Config::default();
            config.detector.warmup_secs = secs;
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidParameter { name: "warmup_secs", .. })
                ),
                "warmup_secs = {secs} should be rejected"
            );
        }
    }

    #[test]
    fn warmup_saturates_instead_of_panicking() {
        let mut detector = DetectorConfig::default();
        detector.warmup_secs = 1e30;
        assert_eq!(detector.warmup(), Duration::MAX);
        detector.warmup_secs = f32::NAN;
        assert_eq!(detector.warmup(), Duration::ZERO);
        detector.warmup_secs = -3.0;
        assert_eq!(detector.warmup(), Duration::ZERO);
    }

    #[test]
    fn rejects_unparseable_fmin() {
        let mut config = Config::default();
        config.transform.fmin_note = "X9".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidNote(_))));
    }
}
