use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// How the host application is being run. Branching on this is data-driven:
/// in `Development` no session is created and quit attempts pass straight
/// through, so an interactive run never clutters the collector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeMode {
    Development,
    Playtest,
}

impl Default for RuntimeMode {
    fn default() -> Self {
        RuntimeMode::Development
    }
}

/// Build facts embedded in archive names and shipped alongside every session.
/// The record is produced by an external build step; this crate only loads
/// and saves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildInfo {
    pub application_name: String,
    pub version_name: String,
    pub addressee: String,
    pub sha: String,
    pub build_time: DateTime<Utc>,
    pub build_number: u32,
    pub unique_build_identifier: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            application_name: "TestApplication".into(),
            version_name: "0.0.0".into(),
            addressee: String::new(),
            sha: "0".repeat(40),
            build_time: Utc::now(),
            build_number: 0,
            unique_build_identifier: String::new(),
        }
    }
}

impl BuildInfo {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read build information from {}", path.display()))?;
            Ok(serde_json::from_str(&contents).unwrap_or_default())
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write build information to {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Collector base URL; the upload endpoint is appended to it.
    pub upload_base_url: String,
    /// External recorder executable. Launched with its own directory as the
    /// working directory.
    pub recorder_binary: PathBuf,
    /// Parent directory for per-session data and the session counter.
    pub data_root: PathBuf,
    pub build_info_path: PathBuf,
    /// Set this to false if you want to ask users for permission first.
    pub start_recording_immediately: bool,
    /// Ask players before turning the face cam on.
    pub include_secondary_stream: bool,
    pub mode: RuntimeMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_base_url: "http://example.com/playtests/".into(),
            recorder_binary: PathBuf::from("obs/bin/64bit/obs64"),
            data_root: PathBuf::from("."),
            build_info_path: PathBuf::from("BuildInformation.json"),
            start_recording_immediately: false,
            include_secondary_stream: false,
            mode: RuntimeMode::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            Ok(serde_json::from_str(&contents).unwrap_or_default())
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("playcap.json")).unwrap();
        assert_eq!(config.mode, RuntimeMode::Development);
        assert!(!config.start_recording_immediately);
    }

    #[test]
    fn config_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playcap.json");

        let mut config = AppConfig::default();
        config.upload_base_url = "http://collector.test/playtests/".into();
        config.mode = RuntimeMode::Playtest;
        config.start_recording_immediately = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.upload_base_url, "http://collector.test/playtests/");
        assert_eq!(loaded.mode, RuntimeMode::Playtest);
        assert!(loaded.start_recording_immediately);
    }

    #[test]
    fn build_info_round_trips_and_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuildInformation.json");

        let mut build = BuildInfo::default();
        build.application_name = "MyApp".into();
        build.build_number = 42;
        build.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"applicationName\""));
        assert!(raw.contains("\"buildNumber\""));

        let loaded = BuildInfo::load(&path).unwrap();
        assert_eq!(loaded.application_name, "MyApp");
        assert_eq!(loaded.build_number, 42);
    }
}
