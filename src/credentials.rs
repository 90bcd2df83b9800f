//! Application credentials read from the process environment.

use std::env;

use crate::auth::Flow;
use crate::error::ConfigError;
use crate::secure::SecureString;

pub const APPLICATION_ID: &str = "APPLICATION_ID";
pub const TENANT_ID: &str = "TENANT_ID";
pub const CLIENT_SECRET: &str = "CLIENT_SECRET";

/// Application (client) id, tenant and optional secret.
///
/// Never persisted. The secret is only present when the flow uses it.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub tenant_id: String,
    pub client_secret: Option<SecureString>,
}

impl Credentials {
    /// Read the variables `flow` needs from the environment.
    ///
    /// `default_tenant` is used by the delegated flows when `TENANT_ID` is unset.
    pub fn from_env(flow: Flow, default_tenant: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(flow, default_tenant, |name| env::var(name).ok())
    }

    /// Same as [`Credentials::from_env`], reading through `lookup`.
    ///
    /// Empty values count as missing.
    pub fn from_lookup(
        flow: Flow,
        default_tenant: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = get(APPLICATION_ID).ok_or(ConfigError::MissingVar(APPLICATION_ID))?;

        let credentials = match flow {
            Flow::AppOnly => Self {
                client_id,
                tenant_id: get(TENANT_ID).ok_or(ConfigError::MissingVar(TENANT_ID))?,
                client_secret: Some(
                    get(CLIENT_SECRET)
                        .ok_or(ConfigError::MissingVar(CLIENT_SECRET))?
                        .into(),
                ),
            },
            Flow::DeviceCode => Self {
                client_id,
                tenant_id: get(TENANT_ID).unwrap_or_else(|| default_tenant.to_string()),
                client_secret: None,
            },
            Flow::AuthCode => Self {
                client_id,
                tenant_id: get(TENANT_ID).unwrap_or_else(|| default_tenant.to_string()),
                client_secret: get(CLIENT_SECRET).map(SecureString::from),
            },
        };

        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_app_only_requires_all_three() {
        let all = [
            (APPLICATION_ID, "app"),
            (TENANT_ID, "tenant"),
            (CLIENT_SECRET, "secret"),
        ];
        let creds = Credentials::from_lookup(Flow::AppOnly, "common", lookup(&all)).unwrap();
        assert_eq!(creds.client_id, "app");
        assert_eq!(creds.tenant_id, "tenant");
        assert_eq!(creds.client_secret.unwrap().as_str(), "secret");

        for missing in [APPLICATION_ID, TENANT_ID, CLIENT_SECRET] {
            let vars: Vec<_> = all.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = Credentials::from_lookup(Flow::AppOnly, "common", lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingVar(name) if name == missing),
                "expected {} to be reported missing, got {:?}",
                missing,
                err
            );
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let vars = [(APPLICATION_ID, "  "), (TENANT_ID, "t"), (CLIENT_SECRET, "s")];
        let err = Credentials::from_lookup(Flow::AppOnly, "common", lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(APPLICATION_ID)));
    }

    #[test]
    fn test_device_code_defaults_tenant_and_drops_secret() {
        let vars = [(APPLICATION_ID, "app"), (CLIENT_SECRET, "secret")];
        let creds = Credentials::from_lookup(Flow::DeviceCode, "common", lookup(&vars)).unwrap();
        assert_eq!(creds.tenant_id, "common");
        assert!(creds.client_secret.is_none());

        let err = Credentials::from_lookup(Flow::DeviceCode, "common", lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(APPLICATION_ID)));
    }

    #[test]
    fn test_auth_code_keeps_optional_secret() {
        let vars = [(APPLICATION_ID, "app"), (CLIENT_SECRET, "secret")];
        let creds = Credentials::from_lookup(Flow::AuthCode, "consumers", lookup(&vars)).unwrap();
        assert_eq!(creds.tenant_id, "consumers");
        assert!(creds.client_secret.is_some());

        let creds =
            Credentials::from_lookup(Flow::AuthCode, "common", lookup(&[(APPLICATION_ID, "app")]))
                .unwrap();
        assert!(creds.client_secret.is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let vars = [
            (APPLICATION_ID, "app"),
            (TENANT_ID, "tenant"),
            (CLIENT_SECRET, "hunter2"),
        ];
        let creds = Credentials::from_lookup(Flow::AppOnly, "common", lookup(&vars)).unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
