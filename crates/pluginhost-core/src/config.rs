//! Host configuration.
//!
//! Defaults live in constant modules, a TOML file may override them, and a
//! small set of environment variables overrides the file. Command line flags
//! are applied last by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default values
pub mod defaults {
    /// Token that ends the dispatch loop (compared case-insensitively).
    pub const QUIT_TOKEN: &str = "q";
    /// Input passed to streaming extensions instead of prompting.
    pub const STREAMING_TRIGGER: &str = "auto-monitor";
    /// Plugins directory name, relative to the executable.
    pub const PLUGINS_DIR_NAME: &str = "plugins";
    /// Host binary name, never a candidate.
    pub const HOST_BINARY_NAME: &str = "pluginhost";
    /// Shared contract library name, never a candidate.
    pub const CONTRACT_LIBRARY_NAME: &str = "pluginhost_sdk";
    /// Stem of the superseded single-file extension bundle.
    pub const LEGACY_ARTIFACT_STEM: &str = "pluginhost_bundle";
    pub const CONFIG_DIR_NAME: &str = "pluginhost";
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}

/// Environment variable names
pub mod env_vars {
    use std::path::PathBuf;

    pub const CONFIG: &str = "PLUGINHOST_CONFIG";
    pub const PLUGINS_DIR: &str = "PLUGINHOST_PLUGINS_DIR";
    pub const MODULE_PREFIX: &str = "PLUGINHOST_MODULE_PREFIX";
    pub const LOG_JSON: &str = "PLUGINHOST_LOG_JSON";

    fn non_empty(name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Config file path from the environment, if set.
    pub fn config_path() -> Option<PathBuf> {
        non_empty(CONFIG).map(PathBuf::from)
    }

    /// Plugins directory from the environment, if set.
    pub fn plugins_dir() -> Option<PathBuf> {
        non_empty(PLUGINS_DIR).map(PathBuf::from)
    }

    /// Module naming prefix from the environment, if set.
    pub fn module_prefix() -> Option<String> {
        non_empty(MODULE_PREFIX)
    }

    /// Whether logs should be emitted as JSON.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Primary search root. Defaults to `<exe dir>/plugins`.
    pub plugins_dir: Option<PathBuf>,

    /// Extra search roots, scanned after the plugins directory.
    pub search_roots: Vec<PathBuf>,

    /// Only accept module files whose name starts with this prefix.
    pub module_prefix: Option<String>,

    /// Superseded artifact removed before scanning.
    pub legacy_artifact: Option<PathBuf>,
}

/// Dispatch loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub quit_token: String,
    pub streaming_trigger: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            quit_token: defaults::QUIT_TOKEN.to_string(),
            streaming_trigger: defaults::STREAMING_TRIGGER.to_string(),
        }
    }
}

/// Full host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
}

impl HostConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load a configuration file. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load from an explicit path, or from the default location if one
    /// exists, then apply environment overrides.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit.map(Path::to_path_buf).or_else(env_vars::config_path) {
            Some(path) => Self::load(&path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PLUGINHOST_PLUGINS_DIR` and `PLUGINHOST_MODULE_PREFIX`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_vars::plugins_dir() {
            self.discovery.plugins_dir = Some(dir);
        }
        if let Some(prefix) = env_vars::module_prefix() {
            self.discovery.module_prefix = Some(prefix);
        }
    }

    /// The primary search root.
    pub fn plugins_dir(&self) -> PathBuf {
        self.discovery
            .plugins_dir
            .clone()
            .unwrap_or_else(default_plugins_dir)
    }

    /// All search roots in scan order, plugins directory first.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.plugins_dir()];
        for root in &self.discovery.search_roots {
            if !roots.contains(root) {
                roots.push(root.clone());
            }
        }
        roots
    }

    /// Location of the superseded aggregate artifact.
    pub fn legacy_artifact(&self) -> PathBuf {
        self.discovery.legacy_artifact.clone().unwrap_or_else(|| {
            self.plugins_dir()
                .join(native_library_file_name(defaults::LEGACY_ARTIFACT_STEM))
        })
    }
}

/// `<config dir>/pluginhost/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join(defaults::CONFIG_DIR_NAME)
            .join(defaults::CONFIG_FILE_NAME)
    })
}

/// `<exe dir>/plugins`, or `./plugins` when the executable path is unknown.
pub fn default_plugins_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(defaults::PLUGINS_DIR_NAME)
}

/// Platform file name for a native library stem, e.g. `libfoo.so`.
pub fn native_library_file_name(stem: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        stem,
        std::env::consts::DLL_SUFFIX
    )
}
