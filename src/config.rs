//! Configuration loader and validator for the gallery sync client.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::registry::UploadPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    pub upload: Upload,
}

/// Remote persistence service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Upload concurrency and file policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upload {
    pub max_concurrency: usize,
    pub max_file_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_file_bytes: self.upload.max_file_bytes,
            allowed_mime_types: self.upload.allowed_mime_types.clone(),
        }
    }
}

impl Backend {
    /// Token for the `Authorization` header, if one is configured.
    pub fn bearer_token(&self) -> Option<&str> {
        Some(self.token.trim()).filter(|t| !t.is_empty())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let base = cfg.backend.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    if reqwest::Url::parse(base).is_err() {
        return Err(ConfigError::Invalid("backend.base_url must be an absolute URL"));
    }
    if cfg.backend.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("backend.timeout_seconds must be > 0"));
    }

    if cfg.upload.max_concurrency == 0 {
        return Err(ConfigError::Invalid("upload.max_concurrency must be > 0"));
    }
    if cfg.upload.max_file_bytes == 0 {
        return Err(ConfigError::Invalid("upload.max_file_bytes must be > 0"));
    }
    if cfg.upload.allowed_mime_types.is_empty() {
        return Err(ConfigError::Invalid("upload.allowed_mime_types must be non-empty"));
    }
    if cfg
        .upload
        .allowed_mime_types
        .iter()
        .any(|m| m.trim().is_empty() || !m.contains('/'))
    {
        return Err(ConfigError::Invalid(
            "upload.allowed_mime_types entries must look like type/subtype",
        ));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"backend:
  base_url: "http://localhost:8080/api/"
  token: ""
  timeout_seconds: 30

upload:
  max_concurrency: 4
  max_file_bytes: 5242880
  allowed_mime_types:
    - "image/jpeg"
    - "image/png"
    - "image/webp"
    - "image/gif"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.backend.bearer_token(), None);
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("backend.base_url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_upload_limits() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.max_concurrency = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("max_concurrency")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.max_file_bytes = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.allowed_mime_types.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.allowed_mime_types.push("jpeg".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn policy_follows_upload_section() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let policy = cfg.upload_policy();
        assert_eq!(policy.max_file_bytes, 5_242_880);
        assert_eq!(policy.allowed_mime_types.len(), 4);
    }

    #[test]
    fn token_and_timeout_default() {
        let yaml = r#"
backend:
  base_url: "https://api.example.com/"
upload:
  max_concurrency: 2
  max_file_bytes: 10
  allowed_mime_types: ["image/*"]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.backend.timeout_seconds, 30);
        assert_eq!(cfg.backend.token, "");
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.upload.max_concurrency, 4);
    }
}
