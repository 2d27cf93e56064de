//! Persistent application configuration model and defaults.

use std::path::PathBuf;

use log::{info, warn};

/// Root configuration persisted to `tunedex.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Library indexing preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Database placement.
    pub database: DatabaseConfig,
}

/// Library indexing preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    /// Folders scanned for audio files.
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default = "default_true")]
    pub scan_on_start: bool,
    /// Name of the scan source all indexed files are recorded under.
    #[serde(default = "default_source_name")]
    pub source_name: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            folders: Vec::new(),
            scan_on_start: true,
            source_name: default_source_name(),
        }
    }
}

/// Database placement.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DatabaseConfig {
    /// Absolute database file path. Empty selects the per-user data dir.
    #[serde(default)]
    pub path: String,
}

fn default_true() -> bool {
    true
}

fn default_source_name() -> String {
    "local".to_string()
}

/// Path of the config file inside the user's config dir.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tunedex.toml"))
}

/// Effective database path: configured value, or `<data_dir>/tunedex/library.db`.
pub fn database_file_path(config: &Config) -> Option<PathBuf> {
    if !config.database.path.is_empty() {
        return Some(PathBuf::from(&config.database.path));
    }
    dirs::data_dir().map(|dir| dir.join("tunedex").join("library.db"))
}

/// Load the config file, writing a default one on first run.
pub fn load_or_create_config() -> Config {
    let Some(config_file) = config_file_path() else {
        warn!("No config directory available. Using default config");
        return Config::default();
    };

    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!("Could not create config directory: {}", error);
            }
        }
        match toml::to_string(&default_config) {
            Ok(text) => {
                if let Err(error) = std::fs::write(&config_file, text) {
                    warn!("Could not write default config: {}", error);
                }
            }
            Err(error) => warn!("Could not serialize default config: {}", error),
        }
        return default_config;
    }

    match std::fs::read_to_string(&config_file) {
        Ok(content) => match toml::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    "Config file {} did not parse, using defaults: {}",
                    config_file.display(),
                    error
                );
                Config::default()
            }
        },
        Err(error) => {
            warn!(
                "Config file {} could not be read, using defaults: {}",
                config_file.display(),
                error
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_scans_on_start_under_local_source() {
        let config = Config::default();
        assert!(config.library.scan_on_start);
        assert_eq!(config.library.source_name, "local");
        assert!(config.library.folders.is_empty());
        assert!(config.database.path.is_empty());
    }

    #[test]
    fn test_partial_config_deserialization_fills_defaults() {
        let partial = r#"
            [library]
            folders = ["/music"]
        "#;
        let parsed: Config = toml::from_str(partial).expect("config should parse");
        assert_eq!(parsed.library.folders, vec!["/music".to_string()]);
        assert!(parsed.library.scan_on_start);
        assert_eq!(parsed.library.source_name, "local");
    }

    #[test]
    fn test_configured_database_path_wins_over_data_dir() {
        let mut config = Config::default();
        config.database.path = "/tmp/custom.db".to_string();
        assert_eq!(
            database_file_path(&config),
            Some(PathBuf::from("/tmp/custom.db"))
        );
    }
}
