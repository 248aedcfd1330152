//! Receivables.

use erp_core::{
    Collection, CollectionStatus, Direction, RemoteStore, Result, SelectQuery,
};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use tracing::instrument;

use crate::table::TableService;

/// Outstanding receivables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivablesSummary {
    /// Receivables not yet fully paid.
    pub open: usize,
    /// Sum of the pending amounts.
    pub pending_amount: f64,
}

/// Receivable CRUD plus pending-balance queries.
#[derive(Debug, Clone)]
pub struct CollectionService {
    table: TableService<Collection>,
}

impl CollectionService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(store),
        }
    }

    /// Receivables that are not fully paid, earliest due first.
    #[instrument(skip(self))]
    pub async fn pending(&self) -> Result<Vec<Collection>> {
        let query = SelectQuery::new()
            .neq("estado", serde_json::to_value(CollectionStatus::Paid)?)
            .order("fecha_vencimiento", Direction::Asc);
        Ok(self.table.select(&query).await?.data)
    }

    /// Count and total of the pending receivables.
    pub async fn summary(&self) -> Result<ReceivablesSummary> {
        let pending = self.pending().await?;
        Ok(ReceivablesSummary {
            open: pending.len(),
            pending_amount: pending.iter().map(|c| c.pending_amount).sum(),
        })
    }
}

impl Deref for CollectionService {
    type Target = TableService<Collection>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_store::SqliteStore;

    fn receivable(pending: f64, status: CollectionStatus) -> Collection {
        Collection {
            total_amount: 100.0,
            pending_amount: pending,
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pending_excludes_paid() {
        let collections = CollectionService::new(Arc::new(SqliteStore::in_memory().unwrap()));
        collections.create(&receivable(100.0, CollectionStatus::Pending)).await.unwrap();
        collections.create(&receivable(40.0, CollectionStatus::Partial)).await.unwrap();
        collections.create(&receivable(0.0, CollectionStatus::Paid)).await.unwrap();

        assert_eq!(collections.pending().await.unwrap().len(), 2);
        assert_eq!(
            collections.summary().await.unwrap(),
            ReceivablesSummary {
                open: 2,
                pending_amount: 140.0
            }
        );
    }
}
