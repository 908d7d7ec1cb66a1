//! Standard locations for mixxer configuration files

use std::path::PathBuf;

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Directory holding mixxer's configuration
///
/// Returns: `<platform config dir>/mixxer` (e.g. `~/.config/mixxer` on Linux),
/// or `./mixxer` when the platform has no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixxer")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("mixxer/config.yaml"));
    }
}
