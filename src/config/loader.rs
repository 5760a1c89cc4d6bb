// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Load a config file and validate it.
///
/// Rejects:
/// - files without tasks,
/// - unknown or self `after` references and cycles,
/// - malformed durations, regexes and `async` phase names,
/// - long-lived tasks without a start command or readiness rule.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_from_path(&path)?;
    ConfigFile::try_from(raw)
}

/// `Bootdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Bootdag.toml")
}
