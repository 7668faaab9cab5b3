use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CLIENT_CACHE_TTL_SECS, DEFAULT_AI_BASE_URL, DEFAULT_AI_MAX_TOKENS, DEFAULT_AI_MODEL,
    DEFAULT_AI_TEMPERATURE, DEFAULT_AUTHORITY_HOST, DEFAULT_FINE_TUNE_SUFFIX,
    DEFAULT_GRAPH_BASE_URL, DELEGATED_SCOPES, HTTP_TIMEOUT_SECS,
};

/// Environment variable overriding `identity.client_secret`
pub const CLIENT_SECRET_ENV: &str = "GRAPHDRAFT_CLIENT_SECRET";
/// Environment variable overriding `ai.api_key`
pub const AI_API_KEY_ENV: &str = "GRAPHDRAFT_AI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Include error detail in user-facing failures
    #[serde(default)]
    pub development: bool,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Reply drafting (OpenAI-compatible endpoint)
    #[serde(default)]
    pub ai: AiConfig,
}

/// App registration on the Microsoft identity platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory (tenant) ID, or `common` / `organizations`
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Delegated scopes for interactive authorization and explicit refresh
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            authority_host: default_authority_host(),
            scopes: default_scopes(),
        }
    }
}

impl IdentityConfig {
    /// `{host}/{tenant}`
    pub fn authority(&self) -> String {
        format!(
            "{}/{}",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a constructed mailbox client is reused
    #[serde(default = "default_client_ttl_secs")]
    pub client_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            client_ttl_secs: default_client_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn client_ttl(&self) -> Duration {
        Duration::from_secs(self.client_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bound on every outbound call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where token sets are persisted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// OS keyring, falling back to files when the keyring is unavailable
    #[default]
    Keyring,
    /// Per-user files only
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory for token files (default: the data directory)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key (required for reply drafting)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    /// Model to use, typically a fine-tuned one
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
    /// Model that fine-tuning jobs start from
    #[serde(default = "default_ai_model")]
    pub fine_tune_base_model: String,
    #[serde(default = "default_fine_tune_suffix")]
    pub fine_tune_suffix: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            temperature: default_ai_temperature(),
            max_tokens: default_ai_max_tokens(),
            fine_tune_base_model: default_ai_model(),
            fine_tune_suffix: default_fine_tune_suffix(),
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn default_tenant_id() -> String {
    "common".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/auth/callback".to_string()
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_scopes() -> Vec<String> {
    DELEGATED_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_graph_base_url() -> String {
    DEFAULT_GRAPH_BASE_URL.to_string()
}

fn default_client_ttl_secs() -> u64 {
    CLIENT_CACHE_TTL_SECS
}

fn default_timeout_secs() -> u64 {
    HTTP_TIMEOUT_SECS
}

fn default_ai_base_url() -> String {
    DEFAULT_AI_BASE_URL.to_string()
}

fn default_ai_model() -> String {
    DEFAULT_AI_MODEL.to_string()
}

fn default_ai_temperature() -> f32 {
    DEFAULT_AI_TEMPERATURE
}

fn default_ai_max_tokens() -> u32 {
    DEFAULT_AI_MAX_TOKENS
}

fn default_fine_tune_suffix() -> String {
    DEFAULT_FINE_TUNE_SUFFIX.to_string()
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("graphdraft");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("graphdraft");
        Ok(dir)
    }

    pub fn token_dir(&self) -> Result<PathBuf> {
        match &self.store.dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::data_dir(),
        }
    }

    pub fn interactions_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("interactions.jsonl"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Please create a config file. Example:\n\n\
                 [identity]\n\
                 tenant_id = \"contoso.onmicrosoft.com\"\n\
                 client_id = \"00000000-0000-0000-0000-000000000000\"\n\
                 redirect_uri = \"http://localhost:3000/auth/callback\"\n\n\
                 [ai]\n\
                 model = \"gpt-3.5-turbo\"\n\n\
                 Secrets can be supplied via {} and {}.",
                path.display(),
                CLIENT_SECRET_ENV,
                AI_API_KEY_ENV
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Secrets from the environment take precedence over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.identity.client_secret = Some(secret);
        }
        if let Some(key) = lookup(AI_API_KEY_ENV).filter(|s| !s.is_empty()) {
            self.ai.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.client_id.trim().is_empty() {
            anyhow::bail!("identity.client_id must be set");
        }
        if self.cache.client_ttl_secs == 0 {
            anyhow::bail!("cache.client_ttl_secs must be greater than zero");
        }
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Starting configuration for an app registration.
    pub fn for_registration(tenant_id: &str, client_id: &str) -> Self {
        let mut config = Self::default();
        config.identity.tenant_id = tenant_id.to_string();
        config.identity.client_id = client_id.to_string();
        config
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        fs::create_dir_all(Self::data_dir()?)?;
        fs::create_dir_all(self.token_dir()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            development = true

            [identity]
            tenant_id = "contoso.onmicrosoft.com"
            client_id = "client-123"
            client_secret = "from-file"
            redirect_uri = "https://addin.contoso.com/auth/callback"

            [mailbox]
            base_url = "https://graph.microsoft.com/beta"

            [cache]
            client_ttl_secs = 600

            [http]
            timeout_secs = 30

            [store]
            backend = "file"
            dir = "/var/lib/graphdraft"

            [ai]
            model = "ft:gpt-3.5-turbo:contoso:b2b-sales-email-replies"
            max_tokens = 300
        "#;

        let config = Config::parse(toml).unwrap();
        assert!(config.development);
        assert_eq!(
            config.identity.authority(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com"
        );
        assert_eq!(config.identity.client_secret.as_deref(), Some("from-file"));
        assert_eq!(config.mailbox.base_url, "https://graph.microsoft.com/beta");
        assert_eq!(config.cache.client_ttl(), Duration::from_secs(600));
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(
            config.token_dir().unwrap(),
            PathBuf::from("/var/lib/graphdraft")
        );
        assert_eq!(config.ai.max_tokens, 300);
        assert_eq!(config.ai.temperature, DEFAULT_AI_TEMPERATURE);
        assert!(!config.ai.is_enabled());
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("[identity]\nclient_id = \"c\"").unwrap();

        assert!(!config.development);
        assert_eq!(config.identity.tenant_id, "common");
        assert_eq!(
            config.identity.scopes,
            vec!["Mail.Read", "Mail.ReadWrite", "Mail.Send", "offline_access"]
        );
        assert_eq!(config.mailbox.base_url, DEFAULT_GRAPH_BASE_URL);
        assert_eq!(config.cache.client_ttl_secs, 3600);
        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.store.backend, StoreBackend::Keyring);
        assert_eq!(config.ai.model, "gpt-3.5-turbo");
        assert_eq!(config.ai.max_tokens, 500);
        assert_eq!(config.ai.fine_tune_base_model, "gpt-3.5-turbo");
        assert_eq!(config.ai.fine_tune_suffix, "b2b-sales-email-replies");
    }

    #[test]
    fn test_env_overrides_file_secrets() {
        let mut config =
            Config::parse("[identity]\nclient_id = \"c\"\nclient_secret = \"file\"").unwrap();

        config.apply_env(|key| match key {
            CLIENT_SECRET_ENV => Some("env-secret".to_string()),
            AI_API_KEY_ENV => Some("sk-env".to_string()),
            _ => None,
        });

        assert_eq!(config.identity.client_secret.as_deref(), Some("env-secret"));
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-env"));
        assert!(config.ai.is_enabled());
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config =
            Config::parse("[identity]\nclient_id = \"c\"\nclient_secret = \"file\"").unwrap();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.identity.client_secret.as_deref(), Some("file"));
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_validate_rejects_missing_client_id() {
        let config = Config::parse("").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = Config::default();
        config.identity.client_id = "client-123".to_string();
        config.store.backend = StoreBackend::File;

        let content = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&content).unwrap();
        assert_eq!(parsed.identity.client_id, "client-123");
        assert_eq!(parsed.store.backend, StoreBackend::File);
    }

    #[test]
    fn test_registration_config_saves_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::for_registration("contoso.onmicrosoft.com", "client-123");
        config.validate().unwrap();
        config.save_to(&path).unwrap();

        let parsed = Config::parse(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.identity.tenant_id, "contoso.onmicrosoft.com");
        assert_eq!(parsed.identity.client_id, "client-123");
        assert_eq!(parsed.identity.client_secret, None);
        assert_eq!(parsed.cache.client_ttl_secs, 3600);
        parsed.validate().unwrap();
    }
}
