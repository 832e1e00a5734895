//! Session configuration, stored as RON.
//!
//! Everything a session needs to know besides the device path lives here,
//! including the recognition mask and emotion table, so retuning never
//! touches the dispatch code.

use crate::decision::{EmotionTable, RecognitionMask};
use crate::features::MfccConfig;
use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::transport::DEFAULT_BAUD;
use crate::window::WindowPolicy;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Errors raised while loading, saving or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid RON for a [`SessionConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] ron::de::SpannedError),

    /// The configuration could not be serialized.
    #[error("config serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// The values are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that shapes a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Samples in one window, also the size of the calibration capture
    pub buffer_size: usize,
    /// Samples shared between consecutive windows
    pub overlap: usize,
    /// How the window moves between rounds
    pub window_policy: WindowPolicy,
    /// Attempts per sample before a read is given up
    pub retry_limit: usize,
    /// Per-read serial timeout, in milliseconds
    pub read_timeout_ms: u64,
    /// Serial baud rate
    pub baud: u32,
    /// Decoded samples buffered between the reader thread and the rounds
    pub feed_capacity: usize,
    /// Rounds launched by `listen`
    pub rounds: usize,
    /// Delay between round launches, in milliseconds
    pub inter_round_delay_ms: u64,
    /// Per-class confidence weights
    pub mask: RecognitionMask,
    /// Classes in model output order
    pub emotions: EmotionTable,
    /// Cepstral transform parameters
    pub mfcc: MfccConfig,
    /// Path to the ONNX classifier
    pub model_path: PathBuf,
    /// Threads the inference engine may use
    pub engine_threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16000,
            overlap: 8000,
            window_policy: WindowPolicy::default(),
            retry_limit: 10,
            read_timeout_ms: 1000,
            baud: DEFAULT_BAUD,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            rounds: 10,
            inter_round_delay_ms: 600,
            mask: RecognitionMask::default(),
            emotions: EmotionTable::default(),
            mfcc: MfccConfig::default(),
            model_path: PathBuf::from("models/emotion.onnx"),
            engine_threads: 1,
        }
    }
}

impl SessionConfig {
    /// Load from `path`, or fall back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = ron::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path` as pretty-printed RON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, PrettyConfig::default())?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check that the values fit together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }
        if self.overlap >= self.buffer_size {
            return Err(ConfigError::Invalid(format!(
                "overlap {} must be smaller than buffer_size {}",
                self.overlap, self.buffer_size
            )));
        }
        if self.retry_limit == 0 {
            return Err(ConfigError::Invalid("retry_limit must be at least 1".into()));
        }
        if self.mask.0.len() != self.emotions.len() {
            return Err(ConfigError::Invalid(format!(
                "mask has {} weights for {} emotions",
                self.mask.0.len(),
                self.emotions.len()
            )));
        }
        self.emotions
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Per-read serial timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Delay between round launches.
    pub fn inter_round_delay(&self) -> Duration {
        Duration::from_millis(self.inter_round_delay_ms)
    }
}
