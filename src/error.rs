//! Error types for msgraph-cli.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration and credential loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The identity provider rejected the request. `code` is the OAuth2
    /// `error` field (e.g. `invalid_client`), `description` carries the
    /// AADSTS message.
    #[error("Token acquisition failed (HTTP {status}) - error: {code}, description: {description}")]
    Provider {
        status: u16,
        code: String,
        description: String,
    },

    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("Device code expired before sign-in completed")]
    DeviceCodeExpired,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("Client secret is required for the {0} flow")]
    MissingClientSecret(&'static str),

    #[error("Network error talking to the identity provider: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid token endpoint response: {0}")]
    InvalidResponse(String),

    #[error("Interaction failed: {0}")]
    Interaction(String),
}

/// Token cache persistence errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to write token cache {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize token cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Microsoft Graph API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-success HTTP status. The raw response body is preserved since
    /// Graph puts its diagnostic code and message there.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Graph API request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid upload path {}: no file name", .0.display())]
    NoFileName(PathBuf),
}

impl ApiError {
    /// HTTP status code, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Returns a hint to print after an error, looking through its source chain.
pub fn hint_for(err: &(dyn std::error::Error + 'static)) -> Option<&'static str> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ConfigError::MissingVar(_)) = e.downcast_ref::<ConfigError>() {
            return Some("Set APPLICATION_ID, TENANT_ID, and CLIENT_SECRET (or put them in .env)");
        }
        if let Some(AuthError::MissingClientSecret(_)) = e.downcast_ref::<AuthError>() {
            return Some("Set CLIENT_SECRET for confidential client flows");
        }
        if let Some(api) = e.downcast_ref::<ApiError>() {
            match api.status() {
                Some(401) => {
                    return Some(
                        "The token was rejected. Delete the token cache file and sign in again.",
                    )
                }
                Some(403) => {
                    return Some(
                        "Insufficient permissions. Check the scopes granted to the application.",
                    )
                }
                _ => {}
            }
        }
        current = e.source();
    }
    None
}
