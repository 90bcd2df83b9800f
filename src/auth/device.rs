//! Device authorization grant (RFC 8628) against the v2.0 endpoints.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::oauth::{delegated_scope_param, provider_error, OAuth2Client, TokenResponse};
use crate::error::AuthError;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Seconds added to the polling interval on `slow_down`.
const SLOW_DOWN_STEP: u64 = 5;

/// Shortest polling interval, whatever the provider sends.
const MIN_POLL_INTERVAL: u64 = 1;

/// Response of the `/devicecode` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

impl DeviceCode {
    /// Instruction text for the user. Azure AD sends a localized message;
    /// fall back to a plain one.
    pub fn instructions(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            )
        })
    }
}

impl OAuth2Client {
    /// Start a device code flow for `scopes`.
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCode, AuthError> {
        let scope = delegated_scope_param(scopes);
        let params = [("client_id", self.client_id()), ("scope", scope.as_str())];

        let response = self
            .http()
            .post(self.endpoint("devicecode"))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(provider_error(status.as_u16(), &body));
        }

        let code: DeviceCode =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        debug!(expires_in = code.expires_in, interval = code.interval, "Device code issued");
        Ok(code)
    }

    /// Poll the token endpoint until the user completes sign-in, the code
    /// expires, or the provider reports a terminal error.
    pub async fn poll_device_code(&self, code: &DeviceCode) -> Result<TokenResponse, AuthError> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = code.interval.max(MIN_POLL_INTERVAL);

        let params = [
            ("client_id", self.client_id()),
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", code.device_code.as_str()),
        ];

        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::DeviceCodeExpired);
            }

            match self.post_token_form(&params).await {
                Ok(token) => {
                    info!("Device code sign-in completed");
                    return Ok(token);
                }
                Err(AuthError::Provider { code, .. }) if code == "authorization_pending" => {
                    debug!("Waiting for user to complete sign-in");
                }
                Err(AuthError::Provider { code, .. }) if code == "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval, "Provider asked to slow down");
                }
                Err(AuthError::Provider { code, .. }) if code == "expired_token" => {
                    return Err(AuthError::DeviceCodeExpired);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_deserialize() {
        let json = r#"{
            "device_code": "GMMhmHCXhWEzkobqIHGG_EnNYYsAkukHspeYUk9E8",
            "user_code": "FJQ6SQ2BM",
            "verification_uri": "https://microsoft.com/devicelogin",
            "expires_in": 900,
            "interval": 5,
            "message": "To sign in, use a web browser to open the page https://microsoft.com/devicelogin and enter the code FJQ6SQ2BM to authenticate."
        }"#;
        let code: DeviceCode = serde_json::from_str(json).unwrap();
        assert_eq!(code.user_code, "FJQ6SQ2BM");
        assert_eq!(code.interval, 5);
        assert!(code.instructions().contains("FJQ6SQ2BM"));
    }

    #[test]
    fn test_device_code_defaults() {
        let json = r#"{
            "device_code": "dc",
            "user_code": "ABC",
            "verification_uri": "https://microsoft.com/devicelogin",
            "expires_in": 900
        }"#;
        let code: DeviceCode = serde_json::from_str(json).unwrap();
        assert_eq!(code.interval, 5);
        assert_eq!(
            code.instructions(),
            "To sign in, open https://microsoft.com/devicelogin and enter the code ABC"
        );
    }
}
