//! YAML file loading
//!
//! Load the server configuration, standalone CI files and schedule
//! definitions from disk.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::config::CiConfig;
use super::server_config::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

/// A named schedule: a CI config supplied directly rather than fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    #[serde(flatten)]
    pub config: CiConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_server_config(path: &Path) -> Result<ServerConfig, LoadError> {
        Self::load_yaml(path)
    }

    pub fn load_ci_config(path: &Path) -> Result<CiConfig, LoadError> {
        let content = std::fs::read_to_string(path)?;
        CiConfig::from_yaml(&content).map_err(|e| LoadError::Yaml {
            file: path.display().to_string(),
            error: e,
        })
    }

    pub fn load_schedule(path: &Path) -> Result<ScheduleDefinition, LoadError> {
        Self::load_yaml(path)
    }

    /// Load every `.yaml`/`.yml` schedule in a directory
    pub fn load_schedule_directory(dir: &Path) -> Result<Vec<ScheduleDefinition>, LoadError> {
        let mut schedules = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                schedules.push(Self::load_schedule(&path)?);
            }
        }

        schedules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schedules)
    }

    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| LoadError::Yaml {
            file: path.display().to_string(),
            error: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_schedule() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nightly.yaml");
        fs::write(
            &path,
            r#"
name: nightly
prequisties:
  image_name: ubuntu:18.04
install:
  - make deps
script:
  - make test
"#,
        )
        .unwrap();

        let schedule = ConfigLoader::load_schedule(&path).unwrap();
        assert_eq!(schedule.name, "nightly");
        assert_eq!(schedule.config.install_script(), "make deps");
        assert_eq!(schedule.config.test_steps, vec!["make test"]);
    }

    #[test]
    fn test_load_schedule_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "name: weekly\ninstall: [make]\n").unwrap();
        fs::write(dir.path().join("a.yml"), "name: nightly\ninstall: [make]\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let schedules = ConfigLoader::load_schedule_directory(dir.path()).unwrap();
        let names: Vec<_> = schedules.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["nightly", "weekly"]);
    }

    #[test]
    fn test_load_ci_config_reports_file_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zeroCI.yaml");
        fs::write(&path, "install: [oops").unwrap();

        match ConfigLoader::load_ci_config(&path) {
            Err(LoadError::Yaml { file, .. }) => assert!(file.ends_with("zeroCI.yaml")),
            other => panic!("expected yaml error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_server_config_missing_file() {
        let result = ConfigLoader::load_server_config(Path::new("/nonexistent/zeroci.yaml"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }
}
