//! Shared HTTP plumbing: headers, session token and error mapping.

use erp_core::{ErpError, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::auth::RestAuth;
use crate::config::RestConfig;
use crate::store::RestStore;

/// Postgres `check_violation`, raised by the stock procedures on overdraw.
const PG_CHECK_VIOLATION: &str = "23514";
/// Postgres `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";
/// PostgREST "no rows" for single-object requests.
const PGRST_NO_ROWS: &str = "PGRST116";

/// Error body returned by the table API or the auth API.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<Value>,
    message: Option<String>,
    details: Option<String>,
    msg: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Stock shortfall reported in the `details` of a check violation.
#[derive(Debug, Deserialize)]
struct ShortfallDetails {
    insumo_id: String,
    disponible: f64,
    solicitado: f64,
}

/// Maps a non-success response to an [`ErpError`].
pub(crate) fn error_from_response(resource: &str, status: StatusCode, body: &str) -> ErpError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = match &parsed.code {
        Some(Value::String(code)) => Some(code.clone()),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    };
    let message = parsed
        .message
        .clone()
        .or_else(|| parsed.error_description.clone())
        .or_else(|| parsed.msg.clone())
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| body.to_string());

    match code.as_deref() {
        Some(PG_CHECK_VIOLATION) => {
            let shortfall = parsed
                .details
                .as_deref()
                .and_then(|d| serde_json::from_str::<ShortfallDetails>(d).ok());
            return match shortfall {
                Some(s) => ErpError::InsufficientStock {
                    supply_id: s.insumo_id,
                    available: s.disponible,
                    requested: s.solicitado,
                },
                None => ErpError::InsufficientStock {
                    supply_id: parsed.details.unwrap_or_default(),
                    available: 0.0,
                    requested: 0.0,
                },
            };
        }
        Some(PG_UNIQUE_VIOLATION) => return ErpError::Conflict(message),
        Some(PGRST_NO_ROWS) => return ErpError::not_found(resource, message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErpError::Auth(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ErpError::Validation(message)
        }
        StatusCode::NOT_FOUND => ErpError::not_found(resource, message),
        StatusCode::CONFLICT => ErpError::Conflict(message),
        _ => ErpError::Remote(format!("HTTP {status}: {message}")),
    }
}

/// Total row count from a `Content-Range` header (`0-9/42`, `*/0`).
pub(crate) fn parse_content_range(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// HTTP client for the hosted service.
///
/// Cheap to clone. The table and auth halves created from one client share
/// the current access token.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: Arc<RestConfig>,
    token: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.config)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RestClient {
    /// Creates a client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ErpError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Creates a client around an existing `reqwest` client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, config: RestConfig) -> Self {
        Self {
            http,
            config: Arc::new(config),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// The connection settings.
    #[must_use]
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// The table/RPC half.
    #[must_use]
    pub fn store(&self) -> RestStore {
        RestStore::new(self.clone())
    }

    /// The auth half.
    #[must_use]
    pub fn auth(&self) -> RestAuth {
        RestAuth::new(self.clone())
    }

    pub(crate) fn set_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub(crate) fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Starts a request with the API key and bearer token set.
    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self.token().unwrap_or_else(|| self.config.api_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    /// Sends a request, mapping transport failures and error statuses.
    pub(crate) async fn send(&self, resource: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            warn!(resource, error = %e, "Request failed");
            ErpError::Remote(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(resource, %status, "Request succeeded");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = error_from_response(resource, status, &body);
        warn!(resource, %status, error = %error, "Request rejected");
        Err(error)
    }

    /// Decodes a JSON body. An empty body decodes as `null`.
    pub(crate) async fn json(response: Response) -> Result<Value> {
        let text = response
            .text()
            .await
            .map_err(|e| ErpError::Remote(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ErpError::Parse(format!("{e}: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = |status: u16, body: &str| {
            error_from_response("clientes", StatusCode::from_u16(status).unwrap(), body)
        };
        assert!(matches!(err(401, r#"{"message":"JWT expired"}"#), ErpError::Auth(m) if m == "JWT expired"));
        assert!(matches!(err(400, r#"{"error_description":"bad"}"#), ErpError::Validation(m) if m == "bad"));
        assert!(matches!(err(404, ""), ErpError::NotFound { .. }));
        assert!(matches!(err(409, "{}"), ErpError::Conflict(_)));
        assert!(matches!(err(503, "down"), ErpError::Remote(m) if m.contains("down")));
        assert!(err(502, "").is_retryable());
    }

    #[test]
    fn test_postgres_codes() {
        let err = error_from_response(
            "rpc",
            StatusCode::BAD_REQUEST,
            r#"{"code":"23514","message":"Stock insuficiente","details":"{\"insumo_id\":\"s1\",\"disponible\":10,\"solicitado\":11}"}"#,
        );
        assert_eq!(
            err,
            ErpError::InsufficientStock {
                supply_id: "s1".to_string(),
                available: 10.0,
                requested: 11.0,
            }
        );
        let err = error_from_response(
            "clientes",
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key"}"#,
        );
        assert_eq!(err, ErpError::Conflict("duplicate key".to_string()));
        let err = error_from_response(
            "clientes",
            StatusCode::NOT_ACCEPTABLE,
            r#"{"code":"PGRST116","message":"0 rows"}"#,
        );
        assert!(matches!(err, ErpError::NotFound { .. }));
    }

    #[test]
    fn test_content_range() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }
}
