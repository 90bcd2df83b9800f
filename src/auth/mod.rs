//! Azure AD authentication module.
//!
//! Provides the OAuth2 token endpoint client, the device code and
//! authorization code flows, and the cache-aware [`TokenAcquirer`] that
//! picks between silent renewal and interactive sign-in.

pub mod acquirer;
pub mod callback_server;
pub mod device;
pub mod interaction;
pub mod oauth;

use chrono::{DateTime, Utc};

use crate::secure::SecureString;

pub use acquirer::TokenAcquirer;
pub use interaction::{Interaction, TerminalInteraction};
pub use oauth::OAuth2Client;

/// OAuth2 flow used to obtain a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Flow {
    /// Client credentials; no user involved.
    AppOnly,
    /// Device code shown in the terminal, entered in a browser.
    DeviceCode,
    /// Browser sign-in redeemed through an authorization code.
    AuthCode,
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::AppOnly => "app-only",
            Flow::DeviceCode => "device-code",
            Flow::AuthCode => "authorization code",
        }
    }

    /// Whether the flow acts on behalf of a signed-in user.
    pub fn is_delegated(&self) -> bool {
        !matches!(self, Flow::AppOnly)
    }
}

/// A bearer token ready to be put in an `Authorization` header.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: SecureString,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl AccessToken {
    pub fn as_str(&self) -> &str {
        self.secret.as_str()
    }
}
