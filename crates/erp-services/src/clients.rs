//! Customers.

use erp_core::{Client, RemoteStore};
use std::ops::Deref;
use std::sync::Arc;

use crate::table::TableService;

/// Customer CRUD and search (name, e-mail, phone).
#[derive(Debug, Clone)]
pub struct ClientService {
    table: TableService<Client>,
}

impl ClientService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(store),
        }
    }
}

impl Deref for ClientService {
    type Target = TableService<Client>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}
