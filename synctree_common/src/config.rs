use crate::SyncError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "synctree.toml";

fn default_refresh_batch_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

/// Maps file names to a content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRule {
    /// Glob matched against the file name (e.g. "*.xml")
    pub pattern: String,
    /// Content type id assigned on match (e.g. "text/xml")
    pub content_type: String,
    /// Whether the content type can be merged line by line
    #[serde(default)]
    pub text: bool,
}

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of files refreshed before the diff tree is updated
    #[serde(default = "default_refresh_batch_size")]
    pub refresh_batch_size: usize,

    /// Content type rules, first match wins
    #[serde(default)]
    pub content_types: Vec<ContentTypeRule>,

    /// Extensions always classified as text (without the dot)
    #[serde(default)]
    pub text_extensions: Vec<String>,

    /// Classify unmatched UTF-8 content without NUL bytes as text
    #[serde(default = "default_true")]
    pub treat_unknown_utf8_as_text: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_batch_size: default_refresh_batch_size(),
            content_types: Vec::new(),
            text_extensions: Vec::new(),
            treat_unknown_utf8_as_text: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SyncConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, SyncError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let mut loaded = load_config_from(&path)?;
    loaded.portable = portable;
    Ok(loaded)
}

/// Load a config file from an explicit location
pub fn load_config_from(path: &Path) -> Result<LoadedConfig, SyncError> {
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(path)?;
        toml::from_str(&data).map_err(|e| SyncError::Serialization(e.to_string()))?
    } else {
        SyncConfig::default()
    };

    if config.refresh_batch_size == 0 {
        return Err(SyncError::Config(
            "refresh_batch_size must be greater than zero".to_string(),
        ));
    }

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        exists,
        portable: false,
    })
}

/// Load the config, writing the defaults when no file exists yet
pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, SyncError> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &SyncConfig) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data =
        toml::to_string_pretty(config).map_err(|e| SyncError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), SyncError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "synctree", "synctree")
        .ok_or_else(|| SyncError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
