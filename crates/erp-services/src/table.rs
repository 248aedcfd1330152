//! Generic CRUD over one table.

use erp_core::{Direction, ErpError, Page, Record, RemoteStore, Result, SelectQuery};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Decodes one row.
pub(crate) fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(ErpError::from)
}

/// Serializes a payload into a JSON object.
pub(crate) fn encode<P: Serialize + ?Sized>(payload: &P) -> Result<Value> {
    match serde_json::to_value(payload)? {
        value @ Value::Object(_) => Ok(value),
        other => Err(ErpError::Validation(format!(
            "Payload must be an object, got {other}"
        ))),
    }
}

/// CRUD, search and pagination for the records of one table.
///
/// Lists are ordered by [`Record::ORDER_BY`], newest first; pages are
/// 1-based.
pub struct TableService<T> {
    store: Arc<dyn RemoteStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for TableService<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TableService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableService")
            .field("record", &std::any::type_name::<T>())
            .field("store", &self.store.name())
            .finish()
    }
}

impl<T: Record> TableService<T> {
    /// Creates a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Runs a query against the table and decodes the rows.
    pub async fn select(&self, query: &SelectQuery) -> Result<Page<T>> {
        let rows = self.store.select(T::TABLE, query).await?;
        let data = rows
            .rows
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<T>>>()?;
        Ok(Page {
            data,
            count: rows.count,
        })
    }

    /// Lists one page, newest first.
    #[instrument(skip(self), fields(table = T::TABLE))]
    pub async fn get_all(&self, page: u32, limit: u32) -> Result<Page<T>> {
        let query = SelectQuery::new()
            .order(T::ORDER_BY, Direction::Desc)
            .page(page, limit);
        self.select(&query).await
    }

    /// Fetches one record.
    ///
    /// # Errors
    /// Returns [`ErpError::NotFound`] if no row has this id.
    #[instrument(skip(self), fields(table = T::TABLE))]
    pub async fn get_by_id(&self, id: &str) -> Result<T> {
        let query = SelectQuery::new().eq("id", id).limit(1);
        self.select(&query)
            .await?
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ErpError::not_found(T::TABLE, id))
    }

    /// Inserts a record and returns it with server-assigned fields.
    #[instrument(skip(self, payload), fields(table = T::TABLE))]
    pub async fn create<P: Serialize + ?Sized + Sync>(&self, payload: &P) -> Result<T> {
        let row = self.store.insert(T::TABLE, encode(payload)?).await?;
        let record: T = decode(row)?;
        debug!(id = record.id(), "Created record");
        Ok(record)
    }

    /// Merges `patch` into the record and returns the result.
    #[instrument(skip(self, patch), fields(table = T::TABLE))]
    pub async fn update<P: Serialize + ?Sized + Sync>(&self, id: &str, patch: &P) -> Result<T> {
        let row = self.store.update(T::TABLE, id, encode(patch)?).await?;
        decode(row)
    }

    /// Deletes a record.
    #[instrument(skip(self), fields(table = T::TABLE))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(T::TABLE, id).await
    }

    /// Case-insensitive search over [`Record::SEARCH_COLUMNS`], newest first.
    ///
    /// A blank term lists everything.
    #[instrument(skip(self), fields(table = T::TABLE))]
    pub async fn search(&self, term: &str, page: u32, limit: u32) -> Result<Page<T>> {
        let query = SelectQuery::new()
            .search(T::SEARCH_COLUMNS, term)
            .order(T::ORDER_BY, Direction::Desc)
            .page(page, limit);
        self.select(&query).await
    }
}
