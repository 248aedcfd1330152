//! Sales.

use erp_core::{Direction, RECENT_SALES_LIMIT, RemoteStore, Result, Sale, SelectQuery};
use std::ops::Deref;
use std::sync::Arc;
use tracing::instrument;

use crate::table::TableService;

/// Sale CRUD, search (client, status) and the recent-sales list.
#[derive(Debug, Clone)]
pub struct SalesService {
    table: TableService<Sale>,
}

impl SalesService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(store),
        }
    }

    /// The newest `limit` sales. `None` uses [`RECENT_SALES_LIMIT`].
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: Option<u32>) -> Result<Vec<Sale>> {
        let limit = limit.unwrap_or(RECENT_SALES_LIMIT) as usize;
        let query = SelectQuery::new()
            .order("fecha_creacion", Direction::Desc)
            .limit(limit);
        Ok(self.table.select(&query).await?.data)
    }
}

impl Deref for SalesService {
    type Target = TableService<Sale>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}
