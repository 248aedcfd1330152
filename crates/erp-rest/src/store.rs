//! PostgREST table API.

use async_trait::async_trait;
use erp_core::{Direction, ErpError, FilterOp, RemoteStore, Result, Rows, SelectQuery};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::{RestClient, parse_content_range};

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Quotes a value inside an `or=(...)` tree.
fn quoted(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Translates a [`SelectQuery`] into PostgREST query parameters.
pub(crate) fn query_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for filter in &query.filters {
        let value = match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => "is.null".to_string(),
            (FilterOp::Neq, Value::Null) => "not.is.null".to_string(),
            (FilterOp::Eq, v) => format!("eq.{}", literal(v)),
            (FilterOp::Neq, v) => format!("neq.{}", literal(v)),
            (FilterOp::Lte, v) => format!("lte.{}", literal(v)),
            (FilterOp::Gte, v) => format!("gte.{}", literal(v)),
        };
        params.push((filter.column.clone(), value));
    }

    if let Some((columns, term)) = &query.search {
        let term = term.trim();
        if !columns.is_empty() && !term.is_empty() {
            let pattern = quoted(&format!("*{term}*"));
            let clauses: Vec<String> = columns
                .iter()
                .map(|column| format!("{column}.ilike.{pattern}"))
                .collect();
            params.push(("or".to_string(), format!("({})", clauses.join(","))));
        }
    }

    if let Some((column, direction)) = &query.order {
        let dir = match direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        params.push(("order".to_string(), format!("{column}.{dir}")));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn by_id(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{id}"))]
}

fn first_row(table: &str, id: &str, body: Value) -> Result<Value> {
    match body {
        Value::Array(rows) => rows
            .into_iter()
            .next()
            .ok_or_else(|| ErpError::not_found(table, id)),
        Value::Object(_) => Ok(body),
        other => Err(ErpError::Parse(format!(
            "Unexpected response for {table}: {other}"
        ))),
    }
}

/// [`RemoteStore`] over the hosted table API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: RestClient,
}

impl RestStore {
    pub(crate) const fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip(self, query), fields(table = %table))]
    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Rows> {
        let url = self.client.config().table_url(table);
        let request = self
            .client
            .request(Method::GET, &url)
            .query(&query_params(query))
            .header("Prefer", "count=exact");
        let response = self.client.send(table, request).await?;

        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let rows = match RestClient::json(response).await? {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => {
                return Err(ErpError::Parse(format!(
                    "Expected an array from {table}, got {other}"
                )));
            }
        };
        let count = total.unwrap_or(rows.len());
        debug!(rows = rows.len(), count, "Selected rows");
        Ok(Rows { rows, count })
    }

    #[instrument(skip(self, row), fields(table = %table))]
    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let url = self.client.config().table_url(table);
        let request = self
            .client
            .request(Method::POST, &url)
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.client.send(table, request).await?;
        first_row(table, "", RestClient::json(response).await?)
    }

    #[instrument(skip(self, patch), fields(table = %table, id = %id))]
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        let url = self.client.config().table_url(table);
        let request = self
            .client
            .request(Method::PATCH, &url)
            .query(&by_id(id))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.client.send(table, request).await?;
        first_row(table, id, RestClient::json(response).await?)
    }

    #[instrument(skip(self), fields(table = %table, id = %id))]
    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let url = self.client.config().table_url(table);
        let request = self
            .client
            .request(Method::DELETE, &url)
            .query(&by_id(id))
            .header("Prefer", "return=representation");
        let response = self.client.send(table, request).await?;
        first_row(table, id, RestClient::json(response).await?).map(|_| ())
    }

    #[instrument(skip(self, args), fields(function = %function))]
    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let url = self.client.config().rpc_url(function);
        let request = self.client.request(Method::POST, &url).json(&args);
        let response = self.client.send(function, request).await?;
        RestClient::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RestConfig;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> RestStore {
        RestClient::new(RestConfig::new(server.uri(), "anon"))
            .unwrap()
            .store()
    }

    #[test]
    fn test_query_params() {
        let query = SelectQuery::new()
            .eq("usuario_id", "u1")
            .eq("activo", true)
            .lte("stock", 5)
            .search(&["nombre", "email"], "ana")
            .order("nombre", Direction::Asc)
            .page(2, 10);
        let params = query_params(&query);
        let get = |k: &str| params.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("usuario_id"), Some("eq.u1"));
        assert_eq!(get("activo"), Some("eq.true"));
        assert_eq!(get("stock"), Some("lte.5"));
        assert_eq!(get("or"), Some(r#"(nombre.ilike."*ana*",email.ilike."*ana*")"#));
        assert_eq!(get("order"), Some("nombre.asc"));
        assert_eq!(get("offset"), Some("10"));
        assert_eq!(get("limit"), Some("10"));
    }

    #[tokio::test]
    async fn test_select_reads_count_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/clientes"))
            .and(query_param("nombre", "eq.Ana"))
            .and(header("apikey", "anon"))
            .and(header("Prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Range", "0-0/7")
                    .set_body_json(json!([{"id": "c1", "nombre": "Ana"}])),
            )
            .mount(&server)
            .await;

        let rows = store(&server)
            .await
            .select("clientes", &SelectQuery::new().eq("nombre", "Ana"))
            .await
            .unwrap();
        assert_eq!(rows.count, 7);
        assert_eq!(rows.rows[0]["id"], json!("c1"));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/clientes"))
            .and(query_param("id", "eq.nope"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .update("clientes", "nope", json!({"nombre": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ErpError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rpc_posts_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/insumos_stock_bajo"))
            .and(body_json(json!({"user_id": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let result = store(&server)
            .await
            .rpc("insumos_stock_bajo", json!({"user_id": "u1"}))
            .await
            .unwrap();
        assert_eq!(result, json!([]));
    }

    #[tokio::test]
    async fn test_rpc_stock_violation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/registrar_produccion"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "23514",
                "message": "Stock insuficiente",
                "details": "{\"insumo_id\":\"s1\",\"disponible\":10,\"solicitado\":11}"
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .rpc("registrar_produccion", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ErpError::InsufficientStock { requested, .. } if requested == 11.0));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = store(&server).await.delete("ventas", "v1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
