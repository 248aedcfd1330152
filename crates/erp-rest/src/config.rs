//! Connection settings for the hosted service.

use erp_core::{ErpError, Result};
use std::fmt;
use std::time::Duration;

/// Environment variable holding the service base URL.
pub const API_URL_ENV: &str = "ERP_API_URL";
/// Environment variable holding the anonymous API key.
pub const API_KEY_ENV: &str = "ERP_API_KEY";
/// Environment variable overriding the request timeout, in seconds.
pub const TIMEOUT_ENV: &str = "ERP_API_TIMEOUT_SECS";

/// Settings for [`RestClient`](crate::RestClient).
#[derive(Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// Service base URL, e.g. `https://project.example.co`.
    pub base_url: String,
    /// Anonymous API key sent as `apikey` on every request.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RestConfig {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a config. A trailing slash on the URL is dropped.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the config from `ERP_API_URL`, `ERP_API_KEY` and, optionally,
    /// `ERP_API_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns a validation error if a required variable is missing or empty,
    /// or if the timeout is not a whole number of seconds.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ErpError::Validation(format!("{name} is not set")))
        };
        let mut config = Self::new(required(API_URL_ENV)?, required(API_KEY_ENV)?);
        if let Some(secs) = lookup(TIMEOUT_ENV) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ErpError::Validation(format!("{TIMEOUT_ENV} must be a number of seconds"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// URL of a table endpoint.
    pub(crate) fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    /// URL of a stored-procedure endpoint.
    pub(crate) fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.base_url)
    }

    /// URL of an auth endpoint.
    pub(crate) fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{endpoint}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup() {
        let config = RestConfig::from_lookup(lookup(&[
            (API_URL_ENV, "https://erp.example.co/"),
            (API_KEY_ENV, "anon"),
            (TIMEOUT_ENV, "5"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://erp.example.co");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.rpc_url("f"), "https://erp.example.co/rest/v1/rpc/f");
    }

    #[test]
    fn test_missing_variables() {
        let err = RestConfig::from_lookup(lookup(&[(API_URL_ENV, "https://erp.example.co")]))
            .unwrap_err();
        assert_eq!(err, ErpError::Validation("ERP_API_KEY is not set".to_string()));
        let err = RestConfig::from_lookup(lookup(&[
            (API_URL_ENV, "https://erp.example.co"),
            (API_KEY_ENV, "anon"),
            (TIMEOUT_ENV, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ErpError::Validation(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = RestConfig::new("https://erp.example.co", "secret-key");
        assert!(!format!("{config:?}").contains("secret-key"));
    }
}
