#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Resource services for the ERP data client.
//!
//! Every service wraps a shared [`RemoteStore`] and dereferences to a
//! [`TableService`] for the common operations (`get_all`, `get_by_id`,
//! `create`, `update`, `delete`, `search`):
//!
//! - [`ClientService`] - Customers
//! - [`InventoryService`] - Finished goods, low-stock list, stock updates
//! - [`SupplyService`] - Supplies, stock movements, statistics
//! - [`SalesService`] - Sales and the recent-sales list
//! - [`CollectionService`] - Receivables and pending balances
//! - [`ProductionService`] - Production history and atomic production runs

use erp_core::RemoteStore;
use std::sync::Arc;

/// Customers.
pub mod clients;
/// Receivables.
pub mod collections;
/// Finished-goods inventory.
pub mod inventory;
/// Production runs.
pub mod production;
/// Sales.
pub mod sales;
/// Supplies and stock movements.
pub mod supplies;
/// Generic table CRUD.
pub mod table;

pub use clients::ClientService;
pub use collections::{CollectionService, ReceivablesSummary};
pub use inventory::InventoryService;
pub use production::{ProductionRun, ProductionService, ProductionStage, validate_request};
pub use sales::SalesService;
pub use supplies::{CategoryStatistics, SupplyService, SupplyStatistics};
pub use table::TableService;

/// Every resource service over one store.
#[derive(Debug, Clone)]
pub struct Services {
    /// Customers.
    pub clients: ClientService,
    /// Finished goods.
    pub inventory: InventoryService,
    /// Supplies and movements.
    pub supplies: SupplyService,
    /// Sales.
    pub sales: SalesService,
    /// Receivables.
    pub collections: CollectionService,
    /// Production.
    pub production: ProductionService,
}

impl Services {
    /// Builds every service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            clients: ClientService::new(Arc::clone(&store)),
            inventory: InventoryService::new(Arc::clone(&store)),
            supplies: SupplyService::new(Arc::clone(&store)),
            sales: SalesService::new(Arc::clone(&store)),
            collections: CollectionService::new(Arc::clone(&store)),
            production: ProductionService::new(store),
        }
    }
}
