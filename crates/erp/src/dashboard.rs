//! Headline figures for the dashboard.

use erp_core::{CollectionStatus, Result};
use erp_services::Services;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Records sampled per resource when computing the summary.
pub const DASHBOARD_SAMPLE: u32 = 100;

/// Sales, stock and receivables at a glance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Σ sale totals.
    #[serde(rename = "ventas_mes")]
    pub sales_total: f64,
    /// Σ finished-goods stock.
    #[serde(rename = "inventario_total")]
    pub inventory_units: f64,
    /// Receivables not yet paid.
    #[serde(rename = "pedidos_pendientes")]
    pub pending_orders: usize,
    /// Σ pending receivable amounts.
    #[serde(rename = "cuentas_por_cobrar")]
    pub receivables: f64,
}

impl DashboardSummary {
    /// Loads the newest [`DASHBOARD_SAMPLE`] sales, products and
    /// receivables concurrently and totals them.
    #[instrument(skip(services))]
    pub async fn load(services: &Services) -> Result<Self> {
        let (sales, products, collections) = tokio::try_join!(
            services.sales.get_all(1, DASHBOARD_SAMPLE),
            services.inventory.get_all(1, DASHBOARD_SAMPLE),
            services.collections.get_all(1, DASHBOARD_SAMPLE),
        )?;

        Ok(Self {
            sales_total: sales.data.iter().map(|s| s.total).sum(),
            inventory_units: products.data.iter().map(|p| p.stock).sum(),
            pending_orders: collections
                .data
                .iter()
                .filter(|c| c.status != CollectionStatus::Paid)
                .count(),
            receivables: collections.data.iter().map(|c| c.pending_amount).sum(),
        })
    }
}
