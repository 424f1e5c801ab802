use crate::core::config::data::{path_display, UserConfig};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Overrides the configuration file location.
pub const CONFIG_PATH_VAR: &str = "LLAMAMAN_CONFIG";

/// Errors that can occur when loading, changing, or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config at {}: {source}", path_display(path))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config at {}: {source}", path_display(path))]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to write the configuration file.
    #[error("Failed to write config at {}: {source}", path_display(path))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown config key '{0}'")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Could not determine a configuration directory for this platform")]
    NoConfigDir,
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("org", "llamaman", "llamaman").ok_or(ConfigError::NoConfigDir)
}

/// Where `config.toml` lives, honoring [`CONFIG_PATH_VAR`].
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

pub(crate) fn default_workspace_dir() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.data_dir().join("workspace"))
}

impl UserConfig {
    pub fn load() -> Result<UserConfig, ConfigError> {
        Self::load_from_path(&config_path()?)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// Load from `config_path`, or defaults when the file does not exist.
    pub fn load_from_path(config_path: &Path) -> Result<UserConfig, ConfigError> {
        if !config_path.exists() {
            debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(UserConfig::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: UserConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
        if config.max_steps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_steps".to_string(),
                reason: "expected a positive integer".to_string(),
            });
        }
        Ok(config)
    }

    /// Write atomically through a temp file in the target directory.
    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        };

        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|err| write_err(std::io::Error::other(err)))?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;

        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(config_path)
            .map_err(|err| write_err(err.error))?;
        debug!(path = %config_path.display(), "Saved config");
        Ok(())
    }
}
