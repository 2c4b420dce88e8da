//! Engine configuration
//!
//! Settings are read from an optional TOML file and `LEGADO__*` environment
//! variables, with serde defaults for everything that is absent.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub script: ScriptConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Script runtime limits
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Heap cap for the embedded runtime, in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
    /// Native stack cap, in bytes
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,
}

/// Settings for the bundled ureq transport
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on followed `nextTocUrl` / `nextContentUrl` pages
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            max_stack_size: default_max_stack_size(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

fn default_memory_limit() -> usize {
    16 * 1024 * 1024
}
fn default_max_stack_size() -> usize {
    512 * 1024
}
fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (Linux; Android 12) AppleWebKit/537.36 ",
        "(KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36"
    )
    .to_string()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_redirects() -> u32 {
    5
}
fn default_max_pages() -> usize {
    20
}

impl EngineConfig {
    /// Load from a TOML file (if it exists) layered under environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let builder = Config::builder();

        let builder = if path.exists() {
            builder.add_source(File::from(path))
        } else {
            builder
        };

        let settings = builder
            .add_source(Environment::with_prefix("LEGADO").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parse an in-memory TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.script.memory_limit, 16 * 1024 * 1024);
        assert_eq!(config.http.timeout_secs, 15);
        assert_eq!(config.orchestrator.max_pages, 20);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [script]
            memory_limit = 1048576

            [http]
            user_agent = "test-agent"
            "#,
        )
        .unwrap();

        assert_eq!(config.script.memory_limit, 1_048_576);
        assert_eq!(config.script.max_stack_size, 512 * 1024);
        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.http.max_redirects, 5);
        assert_eq!(config.orchestrator.max_pages, 20);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load("/nonexistent/legado.toml").unwrap();
        assert_eq!(config.orchestrator.max_pages, 20);
    }
}
