//! SQLite-backed remote store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use erp_core::store::tables;
use erp_core::{
    Direction, ErpError, FilterOp, RemoteStore, Result, Rows, SelectQuery, store::procedures,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::LocalAuth;
use crate::procedures as rpc;

/// Maps a SQLite error into the store error taxonomy.
pub(crate) fn sql_err(e: rusqlite::Error) -> ErpError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            ErpError::Conflict(e.to_string())
        }
        _ => ErpError::Remote(e.to_string()),
    }
}

/// Formats a timestamp the way rows store it.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Inserts a fully-stamped row.
pub(crate) fn insert_row(conn: &Connection, table: &str, row: &Value) -> Result<()> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ErpError::Validation(format!("Row for {table} has no id")))?;
    conn.execute(
        "INSERT INTO rows (tbl, id, data) VALUES (?1, ?2, ?3)",
        params![table, id, serde_json::to_string(row)?],
    )
    .map_err(sql_err)?;
    Ok(())
}

/// Loads one row by id.
pub(crate) fn load_row(conn: &Connection, table: &str, id: &str) -> Result<Option<Value>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM rows WHERE tbl = ?1 AND id = ?2",
            params![table, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;
    data.map(|d| serde_json::from_str(&d).map_err(ErpError::from))
        .transpose()
}

fn json_path(column: &str) -> Result<String> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ErpError::Validation(format!("Invalid column name: {column}")));
    }
    Ok(format!("$.{column}"))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default()), SqlValue::Integer),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// SQL name of the Unicode-aware lowercasing function.
const LOWER_UNICODE: &str = "lower_unicode";

/// Lowercases text with full Unicode case mapping. SQLite's own `lower()`
/// and `LIKE` only fold ASCII letters.
fn lower_unicode(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).to_lowercase()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Builds the `WHERE` clause shared by the row and count queries.
fn where_clause(table: &str, query: &SelectQuery) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = String::from(" WHERE tbl = ?");
    let mut values = vec![SqlValue::Text(table.to_string())];

    for filter in &query.filters {
        let op = match (filter.op, filter.value.is_null()) {
            (FilterOp::Eq, true) => "IS",
            (FilterOp::Neq, true) => "IS NOT",
            (FilterOp::Eq, false) => "=",
            (FilterOp::Neq, false) => "<>",
            (FilterOp::Lte, _) => "<=",
            (FilterOp::Gte, _) => ">=",
        };
        sql.push_str(&format!(" AND json_extract(data, ?) {op} ?"));
        values.push(SqlValue::Text(json_path(&filter.column)?));
        values.push(to_sql(&filter.value));
    }

    if let Some((columns, term)) = &query.search {
        let term = term.trim();
        if !columns.is_empty() && !term.is_empty() {
            let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
            let clause = format!("{LOWER_UNICODE}(json_extract(data, ?)) LIKE ? ESCAPE '\\'");
            let mut clauses = Vec::with_capacity(columns.len());
            for column in columns {
                clauses.push(clause.as_str());
                values.push(SqlValue::Text(json_path(column)?));
                values.push(SqlValue::Text(pattern.clone()));
            }
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
        }
    }

    Ok((sql, values))
}

/// Fills in server-assigned fields.
fn stamp(table: &str, row: &mut Map<String, Value>, now: DateTime<Utc>) {
    let missing = |row: &Map<String, Value>, field: &str| {
        row.get(field)
            .is_none_or(|v| v.is_null() || v.as_str() == Some(""))
    };
    if missing(row, "id") {
        row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    let created = match table {
        tables::SUPPLY_MOVEMENTS => Some("fecha_movimiento"),
        tables::PRODUCTION => None,
        _ => Some("fecha_creacion"),
    };
    if let Some(field) = created {
        if missing(row, field) {
            row.insert(field.into(), Value::String(timestamp(now)));
        }
    }
    if table == tables::SUPPLIES {
        row.entry("activo").or_insert(Value::Bool(true));
        row.insert("fecha_actualizacion".into(), Value::String(timestamp(now)));
    }
}

/// SQLite store holding every table as JSON documents.
///
/// Each call takes the connection lock for its whole duration, and every
/// stored procedure runs in one `BEGIN IMMEDIATE` transaction. Several
/// stores may open the same database file; SQLite's write lock then
/// serializes their procedures.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// How long a writer waits for another connection's lock.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory store. Data is lost when the last clone is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Self::BUSY_TIMEOUT).map_err(sql_err)?;
        conn.create_scalar_function(
            LOWER_UNICODE,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            lower_unicode,
        )
        .map_err(sql_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rows (
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (tbl, id)
            );
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(sql_err)?;
        debug!("SQLite store schema initialized");
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ErpError::Remote(e.to_string()))
    }

    /// Returns an auth provider backed by this store's `users` table.
    #[must_use]
    pub fn auth(&self) -> LocalAuth {
        LocalAuth::new(self.clone())
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    #[instrument(skip(self, query), fields(table = %table))]
    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Rows> {
        let (where_sql, mut values) = where_clause(table, query)?;
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM rows{where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        let mut sql = format!("SELECT data FROM rows{where_sql}");
        if let Some((column, direction)) = &query.order {
            let dir = match direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY json_extract(data, ?) {dir}, rowid {dir}"));
            values.push(SqlValue::Text(json_path(column)?));
        } else {
            sql.push_str(" ORDER BY rowid ASC");
        }
        if query.limit.is_some() || query.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(SqlValue::Integer(
                query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)),
            ));
            values.push(SqlValue::Integer(
                i64::try_from(query.offset.unwrap_or(0)).unwrap_or(i64::MAX),
            ));
        }

        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .map(|data| {
                let data = data.map_err(sql_err)?;
                serde_json::from_str(&data).map_err(ErpError::from)
            })
            .collect::<Result<Vec<Value>>>()?;

        debug!(rows = rows.len(), count, "Selected rows");
        Ok(Rows {
            rows,
            count: usize::try_from(count).unwrap_or_default(),
        })
    }

    #[instrument(skip(self, row), fields(table = %table))]
    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let Value::Object(mut fields) = row else {
            return Err(ErpError::Validation(format!(
                "Row for {table} must be an object"
            )));
        };
        stamp(table, &mut fields, Utc::now());
        let row = Value::Object(fields);
        let conn = self.lock()?;
        insert_row(&conn, table, &row)?;
        debug!(id = ?row.get("id"), "Inserted row");
        Ok(row)
    }

    #[instrument(skip(self, patch), fields(table = %table, id = %id))]
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(ErpError::Validation("Patch must be an object".to_string()));
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_err)?;
        let Some(Value::Object(mut current)) = load_row(&tx, table, id)? else {
            return Err(ErpError::not_found(table, id));
        };
        for (field, value) in patch {
            if field != "id" {
                current.insert(field, value);
            }
        }
        if table == tables::SUPPLIES {
            current.insert(
                "fecha_actualizacion".into(),
                Value::String(timestamp(Utc::now())),
            );
        }
        let row = Value::Object(current);
        tx.execute(
            "UPDATE rows SET data = ?3 WHERE tbl = ?1 AND id = ?2",
            params![table, id, serde_json::to_string(&row)?],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        Ok(row)
    }

    #[instrument(skip(self), fields(table = %table, id = %id))]
    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM rows WHERE tbl = ?1 AND id = ?2",
                params![table, id],
            )
            .map_err(sql_err)?;
        if deleted == 0 {
            return Err(ErpError::not_found(table, id));
        }
        Ok(())
    }

    #[instrument(skip(self, args), fields(function = %function))]
    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let mut conn = self.lock()?;
        let now = Utc::now();
        match function {
            procedures::REGISTER_PRODUCTION => rpc::register_production(&mut conn, args, now),
            procedures::REGISTER_SUPPLY_MOVEMENT => {
                rpc::register_supply_movement(&mut conn, args, now)
            }
            procedures::LOW_STOCK_SUPPLIES => rpc::low_stock_supplies(&conn, &args),
            other => Err(ErpError::not_found("procedure", other)),
        }
    }
}
