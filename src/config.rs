use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub azure: AzureConfig,
    pub deployments: Deployments,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Inline key; takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Deployment names for the three Claude model tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    pub opus: String,
    pub sonnet: String,
    pub haiku: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            read_secs: default_read_secs(),
        }
    }
}

fn default_port() -> u16 {
    8082
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_api_key_env() -> String {
    "AZURE_OPENAI_API_KEY".to_string()
}

fn default_connect_secs() -> u64 {
    10
}

fn default_read_secs() -> u64 {
    300
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Reject configs that cannot address a backend at all.
    pub fn validate(&self) -> Result<()> {
        if self.azure.endpoint.trim().is_empty() {
            return Err(ProxyError::config("azure.endpoint must not be empty"));
        }
        for (tier, name) in [
            ("opus", &self.deployments.opus),
            ("sonnet", &self.deployments.sonnet),
            ("haiku", &self.deployments.haiku),
        ] {
            if name.trim().is_empty() {
                return Err(ProxyError::config(format!(
                    "deployments.{tier} must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the API key: inline value first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.azure.api_key {
            return Ok(key.clone());
        }

        std::env::var(&self.azure.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your Azure OpenAI API key.",
                self.azure.api_key_env
            ))
        })
    }

    /// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}`
    pub fn chat_completions_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.azure.endpoint.trim_end_matches('/'),
            deployment,
            self.azure.api_version
        )
    }

    /// Shared backend client. Only connect and read timeouts are bounded;
    /// a whole-request timeout would cut off long-running streams.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.timeouts.connect_secs))
            .read_timeout(Duration::from_secs(self.timeouts.read_secs))
            .build()?;
        Ok(client)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("azure-claude-proxy.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("azure-claude-proxy")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg)
                    .join("azure-claude-proxy")
                    .join("config.toml"),
            );
        }
        if let Some(home) = dirs_path() {
            paths.push(
                home.join(".config")
                    .join("azure-claude-proxy")
                    .join("config.toml"),
            );
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".azure-claude-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_config() -> ProxyConfig {
        ProxyConfig {
            port: 8082,
            azure: AzureConfig {
                endpoint: "https://res.openai.azure.com/".to_string(),
                api_version: "2024-10-21".to_string(),
                api_key_env: "AZURE_CLAUDE_PROXY_TEST_UNSET_KEY".to_string(),
                api_key: None,
            },
            deployments: Deployments {
                opus: "big".to_string(),
                sonnet: "mid".to_string(),
                haiku: "small".to_string(),
            },
            timeouts: TimeoutConfig::default(),
        }
    }

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[azure]
endpoint = "https://res.openai.azure.com"
api_key = "secret"

[deployments]
opus = "gpt-4o"
sonnet = "gpt-4o"
haiku = "gpt-4o-mini"

[timeouts]
read_secs = 60
"#
        )
        .unwrap();

        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.azure.api_version, "2024-10-21");
        assert_eq!(config.azure.api_key_env, "AZURE_OPENAI_API_KEY");
        assert_eq!(config.deployments.haiku, "gpt-4o-mini");
        assert_eq!(config.timeouts.connect_secs, 10);
        assert_eq!(config.timeouts.read_secs, 60);
        assert_eq!(config.resolve_api_key().unwrap(), "secret");
    }

    #[test]
    fn test_missing_deployments_fails() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[azure]\nendpoint = \"https://x\"\n").unwrap();
        assert!(ProxyConfig::load(f.path()).is_err());
    }

    #[test]
    fn test_chat_completions_url() {
        let config = sample_config();
        assert_eq!(
            config.chat_completions_url("mid"),
            "https://res.openai.azure.com/openai/deployments/mid/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn test_missing_env_key_is_config_error() {
        let config = sample_config();
        let err = config.resolve_api_key().unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn test_validate() {
        let mut config = sample_config();
        assert!(config.validate().is_ok());

        config.deployments.haiku = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.azure.endpoint = String::new();
        assert!(config.validate().is_err());
    }
}
