use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Configuration file name
const CONFIG_FILE: &str = "wd1770emu.toml";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the disk images and the bindings record
    pub image_dir: String,

    /// Image names that load write-protected
    pub write_protect: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            image_dir: "disks".to_string(),
            write_protect: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, or return default if file doesn't exist
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Config::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    warn!("failed to parse {}: {}, using defaults", path.display(), err);
                    Config::default()
                }
            },
            Err(err) => {
                warn!("failed to read {}: {}, using defaults", path.display(), err);
                Config::default()
            }
        }
    }

    /// Apply command-line overrides. CLI arguments take priority over the
    /// TOML settings.
    pub fn apply_cli_overrides(&mut self, image_dir: Option<&str>) {
        if let Some(dir) = image_dir {
            self.image_dir = dir.to_string();
        }
    }
}
