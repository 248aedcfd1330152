//! Finished-goods inventory.

use erp_core::{
    Direction, ErpError, MIN_STOCK_ALERT, Product, RemoteStore, Result, SelectQuery,
};
use serde_json::json;
use std::ops::Deref;
use std::sync::Arc;
use tracing::instrument;

use crate::table::TableService;

/// Product CRUD plus stock queries.
#[derive(Debug, Clone)]
pub struct InventoryService {
    table: TableService<Product>,
}

impl InventoryService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(store),
        }
    }

    /// Products at or below [`MIN_STOCK_ALERT`], lowest stock first.
    #[instrument(skip(self))]
    pub async fn low_stock(&self) -> Result<Vec<Product>> {
        let query = SelectQuery::new()
            .lte("stock", MIN_STOCK_ALERT)
            .order("stock", Direction::Asc);
        Ok(self.table.select(&query).await?.data)
    }

    /// Sets a product's stock.
    ///
    /// # Errors
    /// Returns a validation error for negative stock.
    #[instrument(skip(self))]
    pub async fn update_stock(&self, id: &str, stock: f64) -> Result<Product> {
        if !stock.is_finite() || stock < 0.0 {
            return Err(ErpError::Validation(
                "Stock cannot be negative".to_string(),
            ));
        }
        self.table.update(id, &json!({ "stock": stock })).await
    }
}

impl Deref for InventoryService {
    type Target = TableService<Product>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_store::SqliteStore;

    #[tokio::test]
    async fn test_low_stock_and_update_stock() {
        let inventory = InventoryService::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let pan = inventory.create(&Product::new("Pan", "panaderia", 3.0)).await.unwrap();
        inventory.create(&Product::new("Torta", "pasteleria", 5.0)).await.unwrap();
        inventory.create(&Product::new("Galleta", "panaderia", 40.0)).await.unwrap();

        let low: Vec<String> = inventory
            .low_stock()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(low, vec!["Pan", "Torta"]);
        assert!(pan.is_low_stock());

        let restocked = inventory.update_stock(&pan.id, 12.0).await.unwrap();
        assert_eq!(restocked.stock, 12.0);
        assert!(matches!(
            inventory.update_stock(&pan.id, -1.0).await,
            Err(ErpError::Validation(_))
        ));
        assert_eq!(inventory.low_stock().await.unwrap().len(), 1);
    }
}
