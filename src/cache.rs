//! On-disk token cache.
//!
//! The cache is one JSON document holding accounts, access tokens and
//! refresh tokens. It is loaded before token acquisition and written back
//! after it. There is a single writer per invocation and no file locking.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::oauth::{TokenResponse, RESERVED_SCOPES};
use crate::auth::AccessToken;
use crate::error::CacheError;
use crate::secure::SecureString;

/// Longest token lifetime honoured, in seconds (ten years).
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Whose token a response carries.
#[derive(Debug, Clone, Copy)]
pub enum TokenOwner<'a> {
    /// Client credentials; no account.
    App,
    /// A fresh sign-in. The account comes from the id token.
    SignIn,
    /// A renewal for an account already in the cache.
    Account(&'a Account),
}

/// A signed-in user known to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub home_account_id: String,
    pub client_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenEntry {
    /// `None` for app-only tokens.
    home_account_id: Option<String>,
    client_id: String,
    tenant: String,
    scopes: Vec<String>,
    secret: SecureString,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshTokenEntry {
    home_account_id: String,
    client_id: String,
    secret: SecureString,
}

/// Serializable token cache.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
    #[serde(default)]
    access_tokens: Vec<AccessTokenEntry>,
    #[serde(default)]
    refresh_tokens: Vec<RefreshTokenEntry>,
    #[serde(skip)]
    changed: bool,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache from `path`.
    ///
    /// Returns an empty cache if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("Token cache {:?} does not exist, starting empty", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content).unwrap_or_else(|e| {
                warn!("Failed to parse token cache {:?}: {}, starting empty", path, e);
                Self::default()
            }),
            Err(e) => {
                warn!("Failed to read token cache {:?}: {}, starting empty", path, e);
                Self::default()
            }
        }
    }

    /// Write the cache to `path`.
    ///
    /// Writes a temp file next to the target and renames it over the target.
    /// The file is created with 0600 permissions on Unix since it holds tokens.
    pub fn save(&mut self, path: &Path) -> Result<(), CacheError> {
        let content = self.to_json()?;
        let write_err = |source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token_cache".to_string());
        let tmp_path = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        fs::write(&tmp_path, content).map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }

        fs::rename(&tmp_path, path).map_err(write_err)?;

        self.changed = false;
        debug!("Saved token cache to {:?}", path);
        Ok(())
    }

    /// The cache as a JSON document.
    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Whether anything was added or removed since load or the last save.
    pub fn has_state_changed(&self) -> bool {
        self.changed
    }

    /// Accounts signed in to `client_id`, in a stable order.
    pub fn accounts(&self, client_id: &str) -> Vec<&Account> {
        self.accounts
            .values()
            .filter(|a| a.client_id == client_id)
            .collect()
    }

    /// A cached access token covering `scopes` that is still valid for at
    /// least `buffer`. `account` is `None` for app-only tokens.
    pub fn find_access_token(
        &self,
        client_id: &str,
        tenant: &str,
        account: Option<&Account>,
        scopes: &[String],
        buffer: Duration,
    ) -> Option<AccessToken> {
        let wanted = normalize_scopes(scopes);
        let not_before = Utc::now() + buffer;
        let home_account_id = account.map(|a| a.home_account_id.as_str());

        self.access_tokens
            .iter()
            .filter(|e| e.client_id == client_id)
            .filter(|e| e.home_account_id.as_deref() == home_account_id)
            // Delegated tokens are matched by account; the account may live in a
            // different tenant than the "common" alias used to sign in.
            .filter(|e| account.is_some() || e.tenant == tenant)
            .filter(|e| e.expires_at > not_before)
            .find(|e| wanted.is_subset(&normalize_scopes(&e.scopes)))
            .map(|e| AccessToken {
                secret: e.secret.clone(),
                expires_at: e.expires_at,
                scopes: e.scopes.clone(),
            })
    }

    /// The refresh token stored for `account`, if any.
    pub fn find_refresh_token(&self, account: &Account) -> Option<&SecureString> {
        self.refresh_tokens
            .iter()
            .find(|e| {
                e.home_account_id == account.home_account_id && e.client_id == account.client_id
            })
            .map(|e| &e.secret)
    }

    /// Record a token response and return the access token it carries.
    ///
    /// User-owned responses create or update an account and its refresh
    /// token; app-only responses only cache the access token. Existing access
    /// tokens for the same owner with overlapping scopes are replaced, and
    /// expired ones are dropped.
    pub fn store(
        &mut self,
        client_id: &str,
        tenant: &str,
        requested_scopes: &[String],
        response: &TokenResponse,
        owner: TokenOwner<'_>,
    ) -> (AccessToken, Option<Account>) {
        let now = Utc::now();
        let expires_at = now + clamped_seconds(response.expires_in);

        let mut scopes: Vec<String> = requested_scopes.to_vec();
        for granted in response.granted_scopes() {
            if !scopes.iter().any(|s| s.eq_ignore_ascii_case(&granted)) {
                scopes.push(granted);
            }
        }

        let account = match owner {
            TokenOwner::App => None,
            TokenOwner::SignIn => Some(account_for(client_id, tenant, response)),
            TokenOwner::Account(known) => Some(known.clone()),
        };
        let home_account_id = account.as_ref().map(|a| a.home_account_id.clone());

        let new_scopes = normalize_scopes(&scopes);
        self.access_tokens.retain(|e| {
            let same_owner = e.client_id == client_id
                && e.home_account_id == home_account_id
                && (home_account_id.is_some() || e.tenant == tenant);
            let overlapping = !new_scopes.is_disjoint(&normalize_scopes(&e.scopes));
            e.expires_at > now && !(same_owner && overlapping)
        });

        let secret = SecureString::from(response.access_token.clone());
        self.access_tokens.push(AccessTokenEntry {
            home_account_id: home_account_id.clone(),
            client_id: client_id.to_string(),
            tenant: tenant.to_string(),
            scopes: scopes.clone(),
            secret: secret.clone(),
            expires_at,
        });

        if let Some(account) = &account {
            if let Some(refresh) = &response.refresh_token {
                self.refresh_tokens.retain(|e| {
                    !(e.home_account_id == account.home_account_id && e.client_id == client_id)
                });
                self.refresh_tokens.push(RefreshTokenEntry {
                    home_account_id: account.home_account_id.clone(),
                    client_id: client_id.to_string(),
                    secret: SecureString::from(refresh.clone()),
                });
            }
            self.accounts
                .insert(cache_key(&account.home_account_id, client_id), account.clone());
        }

        self.changed = true;

        (
            AccessToken {
                secret,
                expires_at,
                scopes,
            },
            account,
        )
    }

}

/// `secs` as a duration, capped so that adding it to the current time
/// cannot overflow.
pub(crate) fn clamped_seconds(secs: u64) -> Duration {
    Duration::try_seconds(secs.min(MAX_LIFETIME_SECS) as i64).unwrap_or_else(Duration::zero)
}

fn cache_key(home_account_id: &str, client_id: &str) -> String {
    format!("{}-{}", home_account_id, client_id)
}

/// Build the account for a delegated response from its id token, falling
/// back to a per-client key when no id token came back.
fn account_for(client_id: &str, tenant: &str, response: &TokenResponse) -> Account {
    let claims = response.id_token_claims();
    let tenant_id = claims
        .as_ref()
        .and_then(|c| c.tid.clone())
        .unwrap_or_else(|| tenant.to_string());
    let home_account_id = match claims.as_ref().and_then(|c| c.oid.clone().or(c.sub.clone())) {
        Some(oid) => format!("{}.{}", oid, tenant_id),
        None => format!("{}.{}", client_id, tenant),
    };

    Account {
        home_account_id,
        client_id: client_id.to_string(),
        tenant_id,
        username: claims.and_then(|c| c.preferred_username),
    }
}

/// Lowercased scope set without the OpenID scopes, which are implied.
fn normalize_scopes(scopes: &[String]) -> BTreeSet<String> {
    scopes
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .filter(|s| !RESERVED_SCOPES.contains(&s.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn user_response(access: &str, expires_in: u64) -> TokenResponse {
        let claims = r#"{"oid":"user-oid","tid":"tenant-tid","preferred_username":"ada@contoso.com"}"#;
        TokenResponse {
            access_token: access.into(),
            token_type: "Bearer".into(),
            expires_in,
            refresh_token: Some(format!("rt-{}", access)),
            scope: "User.Read Files.ReadWrite openid profile".into(),
            id_token: Some(format!("h.{}.s", URL_SAFE_NO_PAD.encode(claims))),
        }
    }

    fn app_response(access: &str) -> TokenResponse {
        TokenResponse {
            access_token: access.into(),
            token_type: "Bearer".into(),
            expires_in: 3599,
            refresh_token: None,
            scope: String::new(),
            id_token: None,
        }
    }

    #[test]
    fn test_empty_cache_has_no_accounts() {
        let cache = TokenCache::new();
        assert!(cache.accounts("client").is_empty());
        assert!(!cache.has_state_changed());
    }

    #[test]
    fn test_store_delegated_creates_account() {
        let mut cache = TokenCache::new();
        let requested = scopes(&["User.Read"]);
        let (token, account) = cache.store(
            "client",
            "common",
            &requested,
            &user_response("at1", 3600),
            TokenOwner::SignIn,
        );

        let account = account.unwrap();
        assert_eq!(account.home_account_id, "user-oid.tenant-tid");
        assert_eq!(account.username.as_deref(), Some("ada@contoso.com"));
        assert_eq!(token.as_str(), "at1");
        assert!(cache.has_state_changed());

        let accounts = cache.accounts("client");
        assert_eq!(accounts.len(), 1);
        assert!(cache.accounts("other-client").is_empty());
        assert_eq!(
            cache.find_refresh_token(accounts[0]).map(|s| s.as_str()),
            Some("rt-at1")
        );
    }

    #[test]
    fn test_find_access_token_matches_scope_subset_case_insensitive() {
        let mut cache = TokenCache::new();
        let (_, account) = cache.store(
            "client",
            "common",
            &scopes(&["User.Read", "Files.ReadWrite"]),
            &user_response("at1", 3600),
            TokenOwner::SignIn,
        );
        let account = account.unwrap();

        let found = cache.find_access_token(
            "client",
            "common",
            Some(&account),
            &scopes(&["user.read", "offline_access"]),
            Duration::seconds(300),
        );
        assert_eq!(found.unwrap().as_str(), "at1");

        let missing = cache.find_access_token(
            "client",
            "common",
            Some(&account),
            &scopes(&["Mail.Send"]),
            Duration::seconds(300),
        );
        assert!(missing.is_none());
    }

    #[test]
    fn test_token_inside_buffer_is_not_returned() {
        let mut cache = TokenCache::new();
        let (_, account) = cache.store(
            "client",
            "common",
            &scopes(&["User.Read"]),
            &user_response("short", 120),
            TokenOwner::SignIn,
        );
        let found = cache.find_access_token(
            "client",
            "common",
            account.as_ref(),
            &scopes(&["User.Read"]),
            Duration::seconds(300),
        );
        assert!(found.is_none());
        // The refresh token is still usable
        assert!(cache.find_refresh_token(&account.unwrap()).is_some());
    }

    #[test]
    fn test_app_tokens_are_keyed_by_tenant() {
        let mut cache = TokenCache::new();
        let requested = scopes(&["https://graph.microsoft.com/.default"]);
        let (_, account) = cache.store(
            "client",
            "tenant-a",
            &requested,
            &app_response("app"),
            TokenOwner::App,
        );
        assert!(account.is_none());
        assert!(cache.accounts("client").is_empty());

        let hit = cache.find_access_token("client", "tenant-a", None, &requested, Duration::zero());
        assert_eq!(hit.unwrap().as_str(), "app");
        let miss = cache.find_access_token("client", "tenant-b", None, &requested, Duration::zero());
        assert!(miss.is_none());
    }

    #[test]
    fn test_store_replaces_overlapping_token() {
        let mut cache = TokenCache::new();
        let requested = scopes(&["User.Read"]);
        let signin = TokenOwner::SignIn;
        cache.store("client", "common", &requested, &user_response("old", 3600), signin);
        let (_, account) =
            cache.store("client", "common", &requested, &user_response("new", 3600), signin);

        let found = cache
            .find_access_token("client", "common", account.as_ref(), &requested, Duration::zero())
            .unwrap();
        assert_eq!(found.as_str(), "new");
        assert_eq!(cache.access_tokens.len(), 1);
        assert_eq!(cache.refresh_tokens.len(), 1);
    }


    #[test]
    fn test_renewal_without_id_token_keeps_account() {
        let mut cache = TokenCache::new();
        let requested = scopes(&["User.Read"]);
        let (_, account) = cache.store(
            "client",
            "common",
            &requested,
            &user_response("first", 60),
            TokenOwner::SignIn,
        );
        let account = account.unwrap();

        let mut renewed = app_response("second");
        renewed.refresh_token = Some("rt-second".into());
        let (_, stored_for) = cache.store(
            "client",
            "common",
            &requested,
            &renewed,
            TokenOwner::Account(&account),
        );

        assert_eq!(stored_for.as_ref(), Some(&account));
        assert_eq!(cache.accounts("client"), vec![&account]);
        assert_eq!(
            cache.find_refresh_token(&account).map(|s| s.as_str()),
            Some("rt-second")
        );
        let token = cache
            .find_access_token("client", "common", Some(&account), &requested, Duration::zero())
            .unwrap();
        assert_eq!(token.as_str(), "second");
    }

    #[test]
    fn test_oversized_expires_in_is_clamped() {
        let mut cache = TokenCache::new();
        let mut response = app_response("forever");
        response.expires_in = u64::MAX;
        let requested = scopes(&["https://graph.microsoft.com/.default"]);
        let (token, _) = cache.store("client", "tenant", &requested, &response, TokenOwner::App);

        let limit = Utc::now() + Duration::try_seconds(MAX_LIFETIME_SECS as i64).unwrap();
        assert!(token.expires_at <= limit);
        assert!(token.expires_at > Utc::now() + Duration::try_days(365).unwrap());
        assert_eq!(clamped_seconds(u64::MAX), clamped_seconds(MAX_LIFETIME_SECS));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::load(&dir.path().join("missing.json"));
        assert!(cache.accounts("client").is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();
        let cache = TokenCache::load(&path);
        assert!(cache.accounts("client").is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token_access.json");

        let mut cache = TokenCache::new();
        cache.store(
            "client",
            "common",
            &scopes(&["User.Read"]),
            &user_response("persisted", 3600),
            TokenOwner::SignIn,
        );
        cache.save(&path).unwrap();
        assert!(!cache.has_state_changed());

        let loaded = TokenCache::load(&path);
        let accounts = loaded.accounts("client");
        assert_eq!(accounts.len(), 1);
        let token = loaded
            .find_access_token(
                "client",
                "common",
                Some(accounts[0]),
                &scopes(&["User.Read"]),
                Duration::seconds(60),
            )
            .unwrap();
        assert_eq!(token.as_str(), "persisted");
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        TokenCache::new().save(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
