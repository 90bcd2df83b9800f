//! Cache-aware token acquisition.
//!
//! App-only requests go straight to the client credentials grant unless the
//! cache already has a usable app token. Delegated requests try silent
//! renewal for a cached account first (cached access token, then refresh
//! token) and only fall back to the interactive flow on a miss or when
//! renewal fails.

use chrono::Duration;
use tracing::{debug, info, warn};

use super::interaction::Interaction;
use super::oauth::{parse_authorization_input, OAuth2Client, PkceChallenge, TokenResponse};
use super::{AccessToken, Flow};
use crate::cache::{clamped_seconds, TokenCache, TokenOwner};
use crate::error::AuthError;

/// Tokens expiring within this window are treated as expired.
const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;

pub struct TokenAcquirer<I: Interaction> {
    client: OAuth2Client,
    flow: Flow,
    interaction: I,
    refresh_buffer: Duration,
}

impl<I: Interaction> TokenAcquirer<I> {
    pub fn new(client: OAuth2Client, flow: Flow, interaction: I) -> Self {
        Self {
            client,
            flow,
            interaction,
            refresh_buffer: clamped_seconds(DEFAULT_REFRESH_BUFFER_SECS),
        }
    }

    pub fn with_refresh_buffer(mut self, seconds: u64) -> Self {
        self.refresh_buffer = clamped_seconds(seconds);
        self
    }

    /// Obtain a bearer token for `scopes`, reading and updating `cache`.
    pub async fn acquire(
        &self,
        scopes: &[String],
        cache: &mut TokenCache,
    ) -> Result<AccessToken, AuthError> {
        if self.flow == Flow::AppOnly {
            return self.acquire_app_only(scopes, cache).await;
        }

        if let Some(token) = self.acquire_silent(scopes, cache).await {
            return Ok(token);
        }

        let response = if self.flow == Flow::AuthCode {
            self.run_auth_code_flow(scopes).await?
        } else {
            self.run_device_flow(scopes).await?
        };

        let (token, account) = cache.store(
            self.client.client_id(),
            self.client.tenant(),
            scopes,
            &response,
            TokenOwner::SignIn,
        );
        if let Some(username) = account.as_ref().and_then(|a| a.username.as_deref()) {
            info!("Signed in as {}", username);
        }
        Ok(token)
    }

    async fn acquire_app_only(
        &self,
        scopes: &[String],
        cache: &mut TokenCache,
    ) -> Result<AccessToken, AuthError> {
        let client_id = self.client.client_id();
        let tenant = self.client.tenant();

        if let Some(token) =
            cache.find_access_token(client_id, tenant, None, scopes, self.refresh_buffer)
        {
            debug!("Using cached app-only token");
            return Ok(token);
        }

        let response = self.client.acquire_for_client(scopes).await?;
        info!("Acquired app-only token");
        let (token, _) = cache.store(client_id, tenant, scopes, &response, TokenOwner::App);
        Ok(token)
    }

    /// Renew a token for the first cached account without user interaction.
    ///
    /// Returns `None` on a cache miss or when renewal fails; the failure is
    /// logged, not returned, because the caller falls back to sign-in.
    pub async fn acquire_silent(
        &self,
        scopes: &[String],
        cache: &mut TokenCache,
    ) -> Option<AccessToken> {
        let client_id = self.client.client_id();
        let tenant = self.client.tenant();
        let account = cache.accounts(client_id).first().map(|a| (*a).clone())?;
        debug!(
            account = account.username.as_deref().unwrap_or(account.home_account_id.as_str()),
            "Found cached account"
        );

        if let Some(token) =
            cache.find_access_token(client_id, tenant, Some(&account), scopes, self.refresh_buffer)
        {
            info!("Using cached access token");
            return Some(token);
        }

        let refresh_token = cache.find_refresh_token(&account)?.clone();
        match self.client.refresh_token(refresh_token.as_str(), scopes).await {
            Ok(response) => {
                info!("Renewed access token with cached refresh token");
                let owner = TokenOwner::Account(&account);
                let (token, _) = cache.store(client_id, tenant, scopes, &response, owner);
                Some(token)
            }
            Err(e) => {
                warn!("Silent token renewal failed, falling back to sign-in: {}", e);
                None
            }
        }
    }

    async fn run_device_flow(&self, scopes: &[String]) -> Result<TokenResponse, AuthError> {
        let code = self.client.request_device_code(scopes).await?;
        self.interaction.present_device_code(&code)?;
        self.client.poll_device_code(&code).await
    }

    async fn run_auth_code_flow(&self, scopes: &[String]) -> Result<TokenResponse, AuthError> {
        let pkce = PkceChallenge::new();
        let (auth_url, expected_state) = self.client.generate_auth_url(&pkce, scopes)?;

        let input = self
            .interaction
            .authorize_in_browser(&auth_url, self.client.redirect_uri())?;
        let response = parse_authorization_input(&input)?;

        // A bare pasted code carries no state to compare
        if let Some(state) = &response.state {
            if *state != expected_state {
                return Err(AuthError::StateValidationFailed);
            }
        }

        self.client
            .exchange_code(&response.code, &pkce.verifier, scopes)
            .await
    }
}
