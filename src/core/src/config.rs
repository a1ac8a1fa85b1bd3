//! Build configuration and the per-executor config store.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{BuildError, Result};

/// Image-level metadata recorded with every build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Target architecture (e.g., "amd64", "arm64")
    pub architecture: String,

    /// Target operating system (e.g., "linux")
    pub os: String,

    /// Image author
    #[serde(default)]
    pub author: Option<String>,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            architecture: architecture.to_string(),
            os: "linux".to_string(),
            author: None,
        }
    }
}

/// Build configuration
///
/// Replaced wholesale for every load; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Image metadata
    #[serde(default)]
    pub image: ImageMetadata,

    /// Environment variables, in declaration order
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Working directory inside the image
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// User to run step commands as
    #[serde(default)]
    pub user: Option<String>,

    /// Entrypoint
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,

    /// Default command
    #[serde(default)]
    pub cmd: Option<Vec<String>>,

    /// Exposed ports (e.g., "8080/tcp")
    #[serde(default)]
    pub exposed_ports: Vec<String>,

    /// Labels
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Declared volumes
    #[serde(default)]
    pub volumes: Vec<String>,
}

fn default_workdir() -> String {
    "/".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: ImageMetadata::default(),
            env: Vec::new(),
            workdir: default_workdir(),
            user: None,
            entrypoint: None,
            cmd: None,
            exposed_ports: Vec::new(),
            labels: HashMap::new(),
            volumes: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Load a configuration from a YAML (`.yaml`/`.yml`) or JSON file.
    ///
    /// The loaded configuration is validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BuildError::ConfigInvalid(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: BuildConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)?,
            _ => serde_json::from_str(&data)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that all required build metadata is present.
    pub fn validate(&self) -> Result<()> {
        if self.image.architecture.trim().is_empty() {
            return Err(BuildError::ConfigInvalid(
                "image architecture is required".to_string(),
            ));
        }
        if self.image.os.trim().is_empty() {
            return Err(BuildError::ConfigInvalid("image os is required".to_string()));
        }
        if !self.workdir.starts_with('/') {
            return Err(BuildError::ConfigInvalid(format!(
                "workdir must be an absolute path, got '{}'",
                self.workdir
            )));
        }
        for (key, _) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(BuildError::ConfigInvalid(format!(
                    "invalid environment variable name '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Environment in `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Look up an environment variable by name.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Holds the active [`BuildConfig`] of one executor.
///
/// Loads swap the whole `Arc`, so a reader holding a snapshot never sees a
/// half-applied configuration.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<BuildConfig>>,
}

impl ConfigStore {
    /// Create a store holding the given configuration.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Validate and install a new configuration, replacing the old one.
    pub fn load(&self, config: BuildConfig) -> Result<()> {
        config.validate()?;
        *self.current.write() = Arc::new(config);
        tracing::debug!("Loaded build configuration");
        Ok(())
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<BuildConfig> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = BuildConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workdir, "/");
        assert_eq!(config.image.os, "linux");
    }

    #[test]
    fn test_validate_rejects_missing_architecture() {
        let mut config = BuildConfig::default();
        config.image.architecture = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BuildError::ConfigInvalid(_)));
    }

    #[test]
    fn test_validate_rejects_relative_workdir() {
        let config = BuildConfig {
            workdir: "app".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_validate_rejects_bad_env_key() {
        let config = BuildConfig {
            env: vec![("A=B".to_string(), "c".to_string())],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_list_and_lookup() {
        let config = BuildConfig {
            env: vec![
                ("PATH".to_string(), "/bin".to_string()),
                ("MODE".to_string(), "dev".to_string()),
                ("MODE".to_string(), "prod".to_string()),
            ],
            ..Default::default()
        };
        assert_eq!(config.env_list(), vec!["PATH=/bin", "MODE=dev", "MODE=prod"]);
        assert_eq!(config.env_var("MODE"), Some("prod"));
        assert_eq!(config.env_var("MISSING"), None);
    }

    #[test]
    fn test_from_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.yaml");
        std::fs::write(
            &path,
            "image:\n  architecture: arm64\n  os: linux\nworkdir: /app\nenv:\n  - [LANG, C.UTF-8]\n",
        )
        .unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        assert_eq!(config.image.architecture, "arm64");
        assert_eq!(config.workdir, "/app");
        assert_eq!(config.env_var("LANG"), Some("C.UTF-8"));
    }

    #[test]
    fn test_from_json_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.json");
        std::fs::write(
            &path,
            r#"{"image":{"architecture":"amd64","os":"linux"},"cmd":["/bin/sh"]}"#,
        )
        .unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        assert_eq!(config.cmd, Some(vec!["/bin/sh".to_string()]));
        assert_eq!(config.workdir, "/");
    }

    #[test]
    fn test_from_file_invalid_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.json");
        std::fs::write(&path, r#"{"image":{"architecture":"","os":"linux"}}"#).unwrap();

        let err = BuildConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, BuildError::ConfigInvalid(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let tmp = TempDir::new().unwrap();
        let err = BuildConfig::from_file(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, BuildError::ConfigInvalid(_)));
    }

    #[test]
    fn test_store_load_replaces_wholesale() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        let next = BuildConfig {
            workdir: "/srv".to_string(),
            user: Some("app".to_string()),
            ..Default::default()
        };
        store.load(next.clone()).unwrap();

        assert_eq!(*store.snapshot(), next);
        // Earlier snapshots are unaffected by the load
        assert_eq!(before.workdir, "/");
    }

    #[test]
    fn test_store_load_invalid_keeps_previous() {
        let store = ConfigStore::default();
        let bad = BuildConfig {
            workdir: "relative".to_string(),
            ..Default::default()
        };
        assert!(store.load(bad).is_err());
        assert_eq!(store.snapshot().workdir, "/");
    }

    #[test]
    fn test_store_concurrent_reads_see_whole_configs() {
        let store = Arc::new(ConfigStore::default());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let config = BuildConfig {
                        workdir: format!("/w{}", i),
                        user: Some(format!("u{}", i)),
                        ..Default::default()
                    };
                    store.load(config).unwrap();
                }
            })
        };

        for _ in 0..100 {
            let snap = store.snapshot();
            if let Some(user) = &snap.user {
                // workdir and user always come from the same load
                assert_eq!(snap.workdir, format!("/w{}", &user[1..]));
            }
        }
        writer.join().unwrap();
    }
}
