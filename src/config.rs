//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub scopes: ScopesConfig,
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub authority_host: String,
    pub redirect_uri: String,
    pub default_tenant: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub app_only: Vec<String>,
    pub delegated: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| env::var(name).ok())
    }

    /// Same as [`Config::load`], reading overrides through `lookup`.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Some(host) = lookup("AUTHORITY_HOST") {
            config.oauth.authority_host = host;
        }

        if let Some(redirect_uri) = lookup("REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Some(base_url) = lookup("GRAPH_BASE_URL") {
            config.api.graph_base_url = base_url;
        }

        if let Some(path) = lookup("TOKEN_CACHE_PATH") {
            config.cache.path = PathBuf::from(path);
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configured URLs are usable.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("authority_host", &self.oauth.authority_host),
            ("graph_base_url", &self.api.graph_base_url),
            ("redirect_uri", &self.oauth.redirect_uri),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", name, value, e)))?;
        }

        if self.scopes.app_only.is_empty() || self.scopes.delegated.is_empty() {
            return Err(ConfigError::Invalid("scope lists must not be empty".into()));
        }

        Ok(())
    }

    /// Get the authorization URL for a tenant.
    pub fn auth_url(&self, tenant: &str) -> String {
        authority_endpoint(&self.oauth.authority_host, tenant, "authorize")
    }

    /// Get the token URL for a tenant.
    pub fn token_url(&self, tenant: &str) -> String {
        authority_endpoint(&self.oauth.authority_host, tenant, "token")
    }
}

/// Builds `{host}/{tenant}/oauth2/v2.0/{endpoint}`.
pub fn authority_endpoint(host: &str, tenant: &str, endpoint: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/{}",
        host.trim_end_matches('/'),
        tenant,
        endpoint
    )
}
