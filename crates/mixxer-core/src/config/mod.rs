//! Startup configuration for mixxer
//!
//! A single YAML file holds the audio session defaults used when a session is
//! started without explicit overrides.
//!
//! ```ignore
//! use mixxer_core::config::{default_config_path, load_config, MixxerConfig};
//!
//! let config: MixxerConfig = load_config(&default_config_path());
//! engine.start(config.audio.clone())?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path, CONFIG_FILE_NAME};

use serde::{Deserialize, Serialize};

use crate::audio::SessionConfig;

/// Default interval between status lines in the command-line front end
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

/// Contents of `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixxerConfig {
    /// Session started by default
    pub audio: SessionConfig,
    /// Milliseconds between metric reports
    pub status_interval_ms: u64,
}

impl Default for MixxerConfig {
    fn default() -> Self {
        Self {
            audio: SessionConfig::default(),
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DeviceId;

    #[test]
    fn test_partial_file_fills_defaults() {
        let yaml = "audio:\n  block_size: 256\n  output_device:\n    name: Speakers\n";
        let config: MixxerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.audio.block_size, 256);
        assert_eq!(config.audio.sample_rate, SessionConfig::default().sample_rate);
        assert_eq!(config.audio.output_device, Some(DeviceId::new("Speakers")));
        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.status_interval_ms, DEFAULT_STATUS_INTERVAL_MS);
    }
}
