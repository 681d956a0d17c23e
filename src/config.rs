//! Runtime configuration
//!
//! Defaults are usable out of the box; a TOML file and a couple of
//! environment variables can override them. The curation API key is
//! only ever read from the environment, never from disk.

use crate::{MurmurError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable holding the curation API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Clone, Debug)]
pub struct MurmurConfig {
    /// Where the sled database lives
    pub data_dir: PathBuf,
    /// Free conversations per calendar day
    pub daily_limit: u32,
    /// Microphone capture rate in Hz
    pub input_sample_rate: u32,
    /// Model audio delivery rate in Hz
    pub output_sample_rate: u32,
    /// Samples per capture frame
    pub frame_size: usize,
    /// Spectrum bins per level snapshot
    pub spectrum_bins: usize,
    /// Model used to distill lore facts
    pub curation_model: String,
    /// Voice requested for model speech
    pub voice: String,
    /// Curation API key, from the environment
    pub api_key: Option<String>,
}

/// On-disk overrides; everything is optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    daily_limit: Option<u32>,
    input_sample_rate: Option<u32>,
    output_sample_rate: Option<u32>,
    frame_size: Option<usize>,
    spectrum_bins: Option<usize>,
    curation_model: Option<String>,
    voice: Option<String>,
}

impl Default for MurmurConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur");
        Self {
            data_dir,
            daily_limit: 2,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 256,
            spectrum_bins: 16,
            curation_model: "gemini-2.5-flash".to_string(),
            voice: "Orus".to_string(),
            api_key: None,
        }
    }
}

impl MurmurConfig {
    /// Defaults plus the API key from the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        config
    }

    /// Layer a TOML file over the environment defaults
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_env();
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(config);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| MurmurError::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| MurmurError::Config(format!("cannot parse {}: {e}", path.display())))?;

        if let Some(v) = file.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = file.daily_limit {
            config.daily_limit = v;
        }
        if let Some(v) = file.input_sample_rate {
            config.input_sample_rate = v;
        }
        if let Some(v) = file.output_sample_rate {
            config.output_sample_rate = v;
        }
        if let Some(v) = file.frame_size {
            config.frame_size = v;
        }
        if let Some(v) = file.spectrum_bins {
            config.spectrum_bins = v;
        }
        if let Some(v) = file.curation_model {
            config.curation_model = v;
        }
        if let Some(v) = file.voice {
            config.voice = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Conventional location: `<config dir>/murmur/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
            .join("config.toml")
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = limit;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(MurmurError::Config("frame_size must be positive".to_string()));
        }
        if self.spectrum_bins == 0 || 128 % self.spectrum_bins != 0 {
            return Err(MurmurError::Config(
                "spectrum_bins must divide the analyser's 128 usable bins".to_string(),
            ));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(MurmurError::Config("sample rates must be positive".to_string()));
        }
        Ok(())
    }
}
