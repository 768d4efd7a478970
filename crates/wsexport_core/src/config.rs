use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{DEFAULT_DOMAIN_TEMPLATE, DEFAULT_USER_AGENT};

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    /// Domain template with a `{lang}` placeholder, e.g. `{lang}.wikisource.org`.
    pub domain: Option<String>,
    pub user_agent: Option<String>,
    pub cache_dir: Option<String>,
}

impl AppConfig {
    /// Resolve the domain template: env WSEXPORT_DOMAIN > config > default.
    pub fn domain_template(&self) -> String {
        if let Some(value) = non_empty_env("WSEXPORT_DOMAIN") {
            return value;
        }
        self.wiki
            .domain
            .clone()
            .unwrap_or_else(|| DEFAULT_DOMAIN_TEMPLATE.to_string())
    }

    /// Resolve user agent: env WSEXPORT_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        if let Some(value) = non_empty_env("WSEXPORT_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the artifact/cache directory: env WSEXPORT_CACHE_DIR > config >
    /// a `wsexport` directory under the system temp dir.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(value) = non_empty_env("WSEXPORT_CACHE_DIR") {
            return PathBuf::from(value);
        }
        if let Some(dir) = &self.wiki.cache_dir {
            return PathBuf::from(dir);
        }
        env::temp_dir().join("wsexport")
    }
}

/// Load and parse an AppConfig from a TOML file. Returns default if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AppConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{AppConfig, load_config};

    #[test]
    fn default_config_uses_wikisource_domains() {
        let config = AppConfig::default();
        assert_eq!(config.domain_template(), "{lang}.wikisource.org");
        assert_eq!(config.user_agent(), "wsexport-rust/0.1");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.wiki.domain.is_none());
    }

    #[test]
    fn load_config_parses_wiki_section() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
domain = "{lang}.example.org"
user_agent = "test-agent/1.0"
cache_dir = "/var/cache/wsexport"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.domain_template(), "{lang}.example.org");
        assert_eq!(config.user_agent(), "test-agent/1.0");
        assert_eq!(
            config.cache_dir(),
            Path::new("/var/cache/wsexport").to_path_buf()
        );
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki]\nuser_agent = \"partial/1.0\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.user_agent(), "partial/1.0");
        assert_eq!(config.domain_template(), "{lang}.wikisource.org");
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\ndomain = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
