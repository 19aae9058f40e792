use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Model
    pub model_path: String,
    pub sample_rates: Vec<u32>,

    // Activity detection
    #[serde(default)]
    pub detector: DetectorConfig,

    // Decoding
    #[serde(default)]
    pub decoder: DecoderConfig,

    // Diagnostics
    #[serde(default)]
    pub utterance_dir: Option<String>,
    #[serde(default)]
    pub emit_partials: bool,

    // Meta
    pub log_level: String,
}

/// Default thresholds of the activity detector, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Mean absolute sample level at or above which a frame counts as speech
    pub level_threshold: u32,
    /// Continuous speech needed before activity is reported
    pub speech_timeout: u64,
    /// Continuous silence after speech needed before inactivity is reported
    pub silence_timeout: u64,
    /// Silence since input start after which no-input is reported
    pub noinput_timeout: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            level_threshold: 2,
            speech_timeout: 300,
            silence_timeout: 300,
            noinput_timeout: 5000,
        }
    }
}

/// Options passed to every decoder instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Report per-word timings and confidences in final results
    pub words: bool,
    /// Number of alternatives requested from the decoder (0 = single best)
    pub max_alternatives: u16,
    /// Decoded 10 ms steps required before partial results are reported
    pub min_partial_steps: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            words: true,
            max_alternatives: 0,
            min_partial_steps: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: dirs::data_dir()
                .unwrap_or_default()
                .join("vosk-recog/model")
                .to_string_lossy()
                .to_string(),
            sample_rates: vec![8000, 16000],
            detector: DetectorConfig::default(),
            decoder: DecoderConfig::default(),
            utterance_dir: None,
            emit_partials: false,
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location, or fall back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path
    ///
    /// A missing file yields the defaults. A file that fails to parse is
    /// moved aside as `*.json.corrupt` and the defaults are used.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vosk-recog")
        .join("config.json")
}
