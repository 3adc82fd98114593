//! Repository-level settings for the batch driver.
//!
//! Read from `version_sheet_settings.json` at the repository root. Missing
//! fields take their defaults so a partial file is enough.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const SETTINGS_FILE: &str = "version_sheet_settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read settings {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch; a disabled tree converts nothing
    pub enabled: bool,
    pub convert_xlsx: bool,
    pub convert_xlsm: bool,
    /// Also write macro source to a separate `.vba` file
    pub convert_vba_separate_file: bool,
    /// Gzip binary entries before base64 encoding
    pub compress_binary: bool,
    /// Append one line per converted file to `logfile`
    pub enable_logging: bool,
    pub logfile: PathBuf,
    /// Directories, relative to the root, that are never searched
    pub exclude_directories: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            convert_xlsx: true,
            convert_xlsm: true,
            convert_vba_separate_file: false,
            compress_binary: false,
            enable_logging: false,
            logfile: PathBuf::from("version_sheet.log"),
            exclude_directories: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
