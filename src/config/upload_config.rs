use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cloud::client::S3ClientConfig;
use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_THREADS, ENV_CHUNK_SIZE_MB, ENV_ENDPOINT, ENV_MAX_ATTEMPTS,
    ENV_REGION, ENV_THREADS, MAX_PART_ATTEMPTS, RETRY_BASE_DELAY_MS,
};
use crate::upload::{RetryPolicy, UploadOptions};

const MIB: usize = 1024 * 1024;

/// File and environment level settings for the `s3upload` binary.
///
/// Precedence is defaults, then the YAML file, then `S3UPLOAD_*` environment
/// variables, then command line flags.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub threads: usize,
    pub chunk_size_mb: usize,
    pub overwrite: bool,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    /// Print per-part progress lines
    pub progress: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            threads: DEFAULT_THREADS,
            chunk_size_mb: DEFAULT_CHUNK_SIZE / MIB,
            // The command line tool has always replaced existing objects
            overwrite: true,
            max_attempts: MAX_PART_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            region: None,
            endpoint: None,
            profile: None,
            progress: true,
        }
    }
}

impl UploadConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: UploadConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Apply `S3UPLOAD_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_THREADS) {
            self.threads = parse_var(ENV_THREADS, &value)?;
        }
        if let Some(value) = lookup(ENV_CHUNK_SIZE_MB) {
            self.chunk_size_mb = parse_var(ENV_CHUNK_SIZE_MB, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = parse_var(ENV_MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_REGION) {
            self.region = Some(value);
        }
        if let Some(value) = lookup(ENV_ENDPOINT) {
            self.endpoint = Some(value);
        }
        Ok(())
    }

    /// Build per-call upload options. Progress callbacks and cancellation
    /// are attached by the caller.
    pub fn to_options(&self) -> UploadOptions {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: std::time::Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        };

        UploadOptions::default()
            .with_threads(self.threads)
            .with_chunk_size(self.chunk_size_mb.saturating_mul(MIB))
            .with_overwrite(self.overwrite)
            .with_retry(retry)
    }

    /// S3 connection settings; credentials come from the command line only
    pub fn to_client_config(&self, access_key: Option<String>, secret_key: Option<String>) -> S3ClientConfig {
        S3ClientConfig {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            profile: self.profile.clone(),
            access_key,
            secret_key,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => bail!("Invalid value '{}' for {}", value, name),
    }
}

/// Load the config file if one is given, then apply environment overrides.
///
/// A missing file is not an error: the defaults are used and a warning is
/// logged.
pub fn load_config(config_path: Option<&Path>) -> Result<UploadConfig> {
    let mut config = match config_path {
        Some(path) if path.exists() => UploadConfig::from_yaml_file(path)?,
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            UploadConfig::default()
        }
        None => UploadConfig::default(),
    };

    config.apply_env_overrides()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::{NamedTempFile, TempDir};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let options = UploadConfig::default().to_options();
        assert_eq!(options.threads, DEFAULT_THREADS);
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.retry.max_attempts, MAX_PART_ATTEMPTS);
        assert!(options.overwrite);
    }

    #[test]
    fn test_save_and_load_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("s3upload.yaml");

        let config = UploadConfig {
            threads: 8,
            region: Some("eu-central-1".to_string()),
            ..Default::default()
        };
        config.save_to_yaml_file(&config_path).unwrap();

        let loaded = UploadConfig::from_yaml_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "threads: 12\nchunk_size_mb: 16\n").unwrap();

        let config = UploadConfig::from_yaml_file(temp_file.path()).unwrap();
        assert_eq!(config.threads, 12);
        assert_eq!(config.chunk_size_mb, 16);
        assert_eq!(config.max_attempts, MAX_PART_ATTEMPTS);
        assert_eq!(config.to_options().chunk_size, 16 * MIB);
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "invalid: yaml: content:").unwrap();

        let result = UploadConfig::from_yaml_file(temp_file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to parse YAML"));
    }

    #[test]
    fn test_overrides() {
        let mut config = UploadConfig::default();
        config.apply_overrides(lookup(&[
            (ENV_THREADS, "3"),
            (ENV_CHUNK_SIZE_MB, "10"),
            (ENV_MAX_ATTEMPTS, "2"),
            (ENV_ENDPOINT, "http://localhost:9000"),
        ])).unwrap();

        assert_eq!(config.threads, 3);
        assert_eq!(config.chunk_size_mb, 10);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.region, None);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = UploadConfig::default();
        let err = config.apply_overrides(lookup(&[(ENV_THREADS, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_THREADS));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(Some(&temp_dir.path().join("missing.yaml"))).unwrap();
        // Environment overrides may apply, but the file was not required
        assert!(config.threads >= 1);
    }

    #[test]
    fn test_client_config() {
        let config = UploadConfig {
            profile: Some("backup".to_string()),
            ..Default::default()
        };
        let client = config.to_client_config(Some("AKIA".to_string()), None);
        assert_eq!(client.profile.as_deref(), Some("backup"));
        assert_eq!(client.access_key.as_deref(), Some("AKIA"));
        assert!(client.secret_key.is_none());
    }
}
