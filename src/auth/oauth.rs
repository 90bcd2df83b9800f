//! OAuth2 client for the Microsoft identity platform v2.0 endpoints.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::{authority_endpoint, OAuthConfig};
use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::secure::SecureString;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes added to every delegated request so the response carries a
/// refresh token and an id token.
pub const RESERVED_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        Self {
            challenge: challenge_for(&verifier),
            verifier,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// challenge = BASE64URL(SHA256(verifier))
fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// OAuth2 client for Azure AD authentication.
pub struct OAuth2Client {
    client_id: String,
    tenant: String,
    client_secret: Option<SecureString>,
    authority_host: String,
    redirect_uri: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from credentials and configuration.
    pub fn new(credentials: &Credentials, oauth: &OAuthConfig) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client_id: credentials.client_id.clone(),
            tenant: credentials.tenant_id.clone(),
            client_secret: credentials.client_secret.clone(),
            authority_host: oauth.authority_host.clone(),
            redirect_uri: oauth.redirect_uri.clone(),
            http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub(crate) fn endpoint(&self, name: &str) -> String {
        authority_endpoint(&self.authority_host, &self.tenant, name)
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// Returns the URL and a CSRF state token that must be verified in the callback.
    pub fn generate_auth_url(
        &self,
        pkce: &PkceChallenge,
        scopes: &[String],
    ) -> Result<(Url, String), AuthError> {
        let mut rng = rand::thread_rng();
        let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
        let state = URL_SAFE_NO_PAD.encode(&state_bytes);

        let mut url = Url::parse(&self.endpoint("authorize"))
            .map_err(|e| AuthError::OAuthFailed(format!("invalid authorize endpoint: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &delegated_scope_param(scopes))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok((url, state))
    }

    /// App-only token via the client credentials grant.
    pub async fn acquire_for_client(&self, scopes: &[String]) -> Result<TokenResponse, AuthError> {
        let secret = self
            .client_secret
            .as_ref()
            .ok_or(AuthError::MissingClientSecret("app-only"))?;
        let scope = scopes.join(" ");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];

        self.post_token_form(&params).await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = delegated_scope_param(scopes);
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        self.post_token_form(&params).await
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = delegated_scope_param(scopes);
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        self.post_token_form(&params).await
    }

    /// POST a form to the token endpoint.
    ///
    /// The body is read as text before the status check so a failure keeps the
    /// provider's `error` / `error_description` pair.
    pub(crate) async fn post_token_form(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let grant = params
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("unknown");
        tracing::debug!(grant, tenant = %self.tenant, "Requesting token");

        let response = self
            .http_client
            .post(self.endpoint("token"))
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(provider_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http_client
    }
}

/// Error body returned by the v2.0 endpoints.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Map a non-success token endpoint response to [`AuthError::Provider`].
pub(crate) fn provider_error(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<ProviderErrorBody>(body) {
        Ok(parsed) => {
            tracing::debug!(status, code = %parsed.error, "Identity provider returned an error");
            AuthError::Provider {
                status,
                code: parsed.error,
                description: parsed.error_description.unwrap_or_default(),
            }
        }
        Err(_) => AuthError::Provider {
            status,
            code: "unknown".to_string(),
            description: body.to_string(),
        },
    }
}

/// Space-separated scope list for delegated requests, with the reserved
/// OpenID scopes appended once.
pub fn delegated_scope_param(scopes: &[String]) -> String {
    let mut seen = BTreeSet::new();
    let mut out: Vec<&str> = Vec::new();
    for scope in scopes
        .iter()
        .map(String::as_str)
        .chain(RESERVED_SCOPES.iter().copied())
    {
        if seen.insert(scope.to_ascii_lowercase()) {
            out.push(scope);
        }
    }
    out.join(" ")
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Granted scopes as reported by the provider.
    pub fn granted_scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }

    /// Claims of the id token, if one was returned and is readable.
    ///
    /// The signature is not checked: the token came straight from the token
    /// endpoint over TLS and is only used to label the cached account.
    pub fn id_token_claims(&self) -> Option<IdTokenClaims> {
        let payload = self.id_token.as_deref()?.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// The id token claims used to identify an account.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub sub: Option<String>,
    pub tid: Option<String>,
    pub preferred_username: Option<String>,
}

/// Code and optional state taken from a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: Option<String>,
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<AuthorizationResponse, AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    Ok(AuthorizationResponse {
        code,
        state: params.get("state").map(|s| s.to_string()),
    })
}

/// Accept either a full redirect URL or a bare authorization code, as
/// pasted into the terminal.
pub fn parse_authorization_input(input: &str) -> Result<AuthorizationResponse, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::UserCancelled);
    }
    if input.contains("://") {
        return parse_callback_url(input);
    }
    if input.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidAuthCode);
    }
    Ok(AuthorizationResponse {
        code: input.to_string(),
        state: None,
    })
}
