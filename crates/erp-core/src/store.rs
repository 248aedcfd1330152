//! Remote store contract.
//!
//! This module defines the seam between the service layer and the hosted
//! database:
//!
//! - [`RemoteStore`] - CRUD over named tables plus stored-procedure calls
//! - [`SelectQuery`] - Filtering, search, ordering and range pagination
//! - [`Record`] - Maps a record type to its table and resource family
//!
//! Rows cross the seam as [`serde_json::Value`]; typed decoding happens in
//! the service layer.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;

use crate::{
    error::Result,
    key::Resource,
    types::{Client, Collection, Product, ProductionRecord, Sale, StockMovement, Supply},
};

/// Table names in the hosted schema.
pub mod tables {
    /// Customers.
    pub const CLIENTS: &str = "clientes";
    /// Finished goods.
    pub const INVENTORY: &str = "inventario";
    /// Supplies.
    pub const SUPPLIES: &str = "insumos";
    /// Supply stock movements.
    pub const SUPPLY_MOVEMENTS: &str = "movimientos_insumos";
    /// Sales.
    pub const SALES: &str = "ventas";
    /// Receivables.
    pub const COLLECTIONS: &str = "cobranzas";
    /// Production runs.
    pub const PRODUCTION: &str = "produccion";
}

/// Stored procedures in the hosted schema.
pub mod procedures {
    /// Atomically records a production run (see the production service).
    pub const REGISTER_PRODUCTION: &str = "registrar_produccion";
    /// Atomically applies a single supply movement.
    pub const REGISTER_SUPPLY_MOVEMENT: &str = "registrar_movimiento_insumo";
    /// Lists active supplies at or below their minimum stock.
    pub const LOW_STOCK_SUPPLIES: &str = "insumos_stock_bajo";
}

/// Comparison used by a [`Filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// `column = value`
    Eq,
    /// `column <= value`
    Lte,
    /// `column >= value`
    Gte,
    /// `column <> value`
    Neq,
}

/// A single column predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Comparison.
    pub op: FilterOp,
    /// Right-hand side.
    pub value: Value,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

/// A read against one table.
///
/// Filters are ANDed together; `search` matches rows where any of the
/// listed columns contains the term (case-insensitive).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectQuery {
    /// Column predicates.
    pub filters: Vec<Filter>,
    /// Case-insensitive substring search over several columns.
    pub search: Option<(Vec<String>, String)>,
    /// Ordering.
    pub order: Option<(String, Direction)>,
    /// Zero-based offset.
    pub offset: Option<usize>,
    /// Maximum rows.
    pub limit: Option<usize>,
}

impl SelectQuery {
    /// Creates an unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    /// Adds an inequality predicate.
    #[must_use]
    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    /// Adds a `<=` predicate.
    #[must_use]
    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    /// Adds a `>=` predicate.
    #[must_use]
    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// Matches rows where any of `columns` contains `term`.
    #[must_use]
    pub fn search(mut self, columns: &[&str], term: impl Into<String>) -> Self {
        self.search = Some((
            columns.iter().map(|c| (*c).to_string()).collect(),
            term.into(),
        ));
        self
    }

    /// Orders by a column.
    #[must_use]
    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    /// Restricts to one page. `page` is 1-based; page 0 is treated as 1.
    #[must_use]
    pub fn page(mut self, page: u32, limit: u32) -> Self {
        let page = page.max(1) as usize;
        let limit = limit as usize;
        self.offset = Some((page - 1) * limit);
        self.limit = Some(limit);
        self
    }

    /// Restricts to the first `limit` rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Rows returned by a select, with the total matching count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rows {
    /// The page of rows.
    pub rows: Vec<Value>,
    /// Total rows matching the filters, ignoring pagination.
    pub count: usize,
}

/// The hosted relational store: CRUD over named tables and RPC.
///
/// Implementations must run each [`RemoteStore::rpc`] call as a single
/// atomic transaction.
#[async_trait]
pub trait RemoteStore: Send + Sync + Debug {
    /// Returns a short name for logs (e.g. "sqlite", "rest").
    fn name(&self) -> &str;

    /// Reads rows from a table.
    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Rows>;

    /// Inserts a row and returns it with server-assigned fields filled in.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Merges `patch` into the row with the given id and returns the result.
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value>;

    /// Deletes the row with the given id.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// Calls a stored procedure.
    async fn rpc(&self, function: &str, args: Value) -> Result<Value>;
}

/// A record type stored in one table.
pub trait Record: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Table holding the records.
    const TABLE: &'static str;
    /// Resource family for cache keys and invalidation.
    const RESOURCE: Resource;
    /// Default ordering column (newest first).
    const ORDER_BY: &'static str;
    /// Columns matched by free-text search.
    const SEARCH_COLUMNS: &'static [&'static str] = &[];

    /// Returns the record id.
    fn id(&self) -> &str;
}

impl Record for Client {
    const TABLE: &'static str = tables::CLIENTS;
    const RESOURCE: Resource = Resource::Clients;
    const ORDER_BY: &'static str = "fecha_creacion";
    const SEARCH_COLUMNS: &'static [&'static str] = &["nombre", "email", "telefono"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Product {
    const TABLE: &'static str = tables::INVENTORY;
    const RESOURCE: Resource = Resource::Inventory;
    const ORDER_BY: &'static str = "fecha_creacion";
    const SEARCH_COLUMNS: &'static [&'static str] = &["nombre_producto", "descripcion", "categoria"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Sale {
    const TABLE: &'static str = tables::SALES;
    const RESOURCE: Resource = Resource::Sales;
    const ORDER_BY: &'static str = "fecha_creacion";
    const SEARCH_COLUMNS: &'static [&'static str] = &["cliente", "estado"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Collection {
    const TABLE: &'static str = tables::COLLECTIONS;
    const RESOURCE: Resource = Resource::Collections;
    const ORDER_BY: &'static str = "fecha_creacion";
    const SEARCH_COLUMNS: &'static [&'static str] = &["cliente", "estado"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Supply {
    const TABLE: &'static str = tables::SUPPLIES;
    const RESOURCE: Resource = Resource::Supplies;
    const ORDER_BY: &'static str = "fecha_creacion";
    const SEARCH_COLUMNS: &'static [&'static str] = &["nombre_insumo", "descripcion", "categoria"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for StockMovement {
    const TABLE: &'static str = tables::SUPPLY_MOVEMENTS;
    const RESOURCE: Resource = Resource::SupplyMovements;
    const ORDER_BY: &'static str = "fecha_movimiento";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ProductionRecord {
    const TABLE: &'static str = tables::PRODUCTION;
    const RESOURCE: Resource = Resource::Production;
    const ORDER_BY: &'static str = "fecha_produccion";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets_are_one_based() {
        let q = SelectQuery::new().page(3, 10);
        assert_eq!(q.offset, Some(20));
        assert_eq!(q.limit, Some(10));
        let q = SelectQuery::new().page(0, 10);
        assert_eq!(q.offset, Some(0));
    }

    #[test]
    fn test_builder_accumulates_filters() {
        let q = SelectQuery::new()
            .eq("usuario_id", "u1")
            .eq("activo", true)
            .order("nombre_insumo", Direction::Asc);
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[1].value, Value::Bool(true));
        assert_eq!(q.order, Some(("nombre_insumo".to_string(), Direction::Asc)));
    }
}
