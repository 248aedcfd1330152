//! Supplies (insumos) and their stock movements.

use erp_core::store::procedures;
use erp_core::{
    Direction, ErpError, LowStockSupply, MovementForm, Page, RemoteStore, Result, SelectQuery,
    StockMovement, Supply, SupplyCategory, SupplyForm,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::table::{TableService, decode, encode};

/// Count and stock value of one supply category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryStatistics {
    /// The category.
    #[serde(rename = "categoria")]
    pub category: SupplyCategory,
    /// Active supplies in the category.
    pub count: usize,
    /// Σ stock × unit cost.
    #[serde(rename = "valor")]
    pub value: f64,
}

/// Inventory figures for one user's active supplies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplyStatistics {
    /// Active supplies.
    #[serde(rename = "total_insumos")]
    pub total_supplies: usize,
    /// Σ stock × unit cost over all active supplies.
    #[serde(rename = "valor_total_inventario")]
    pub total_value: f64,
    /// Supplies at or below their minimum stock.
    #[serde(rename = "insumos_stock_bajo")]
    pub low_stock: usize,
    /// Per-category breakdown, in first-seen order.
    #[serde(rename = "categorias")]
    pub categories: Vec<CategoryStatistics>,
}

impl SupplyStatistics {
    /// Aggregates a set of supplies.
    #[must_use]
    pub fn from_supplies(supplies: &[Supply]) -> Self {
        let mut stats = Self {
            total_supplies: supplies.len(),
            ..Self::default()
        };
        for supply in supplies {
            let value = supply.total_value();
            stats.total_value += value;
            if supply.current_stock <= supply.min_stock {
                stats.low_stock += 1;
            }
            match stats
                .categories
                .iter_mut()
                .find(|c| c.category == supply.category)
            {
                Some(entry) => {
                    entry.count += 1;
                    entry.value += value;
                }
                None => stats.categories.push(CategoryStatistics {
                    category: supply.category,
                    count: 1,
                    value,
                }),
            }
        }
        stats
    }
}

/// Supply CRUD, stock movements and inventory statistics.
#[derive(Debug, Clone)]
pub struct SupplyService {
    table: TableService<Supply>,
    movements: TableService<StockMovement>,
}

impl SupplyService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(Arc::clone(&store)),
            movements: TableService::new(store),
        }
    }

    /// Creates an active supply owned by `user_id`.
    ///
    /// # Errors
    /// Returns a validation error if the form is invalid.
    #[instrument(skip(self, form))]
    pub async fn create_for_user(&self, form: &SupplyForm, user_id: &str) -> Result<Supply> {
        form.validate()?;
        let mut row = encode(form)?;
        row["usuario_id"] = json!(user_id);
        row["activo"] = json!(true);
        self.table.create(&row).await
    }

    /// Active supplies of one category, by name.
    #[instrument(skip(self))]
    pub async fn by_category(&self, category: SupplyCategory, user_id: &str) -> Result<Vec<Supply>> {
        let query = SelectQuery::new()
            .eq("categoria", category.as_str())
            .eq("usuario_id", user_id)
            .eq("activo", true)
            .order("nombre_insumo", Direction::Asc);
        Ok(self.table.select(&query).await?.data)
    }

    /// Active supplies at or below their minimum stock, with the shortfall.
    #[instrument(skip(self))]
    pub async fn low_stock(&self, user_id: &str) -> Result<Vec<LowStockSupply>> {
        let rows = self
            .table
            .store()
            .rpc(procedures::LOW_STOCK_SUPPLIES, json!({ "user_id": user_id }))
            .await?;
        match rows {
            Value::Null => Ok(Vec::new()),
            rows => decode(rows),
        }
    }

    /// Movements of one supply, newest first.
    #[instrument(skip(self))]
    pub async fn movements(&self, supply_id: &str, page: u32, limit: u32) -> Result<Page<StockMovement>> {
        let query = SelectQuery::new()
            .eq("insumo_id", supply_id)
            .order("fecha_movimiento", Direction::Desc)
            .page(page, limit);
        self.movements.select(&query).await
    }

    /// Movements recorded by one user, newest first.
    #[instrument(skip(self))]
    pub async fn all_movements(&self, user_id: &str, page: u32, limit: u32) -> Result<Page<StockMovement>> {
        let query = SelectQuery::new()
            .eq("usuario_id", user_id)
            .order("fecha_movimiento", Direction::Desc)
            .page(page, limit);
        self.movements.select(&query).await
    }

    /// Fetches one movement.
    pub async fn movement_by_id(&self, id: &str) -> Result<StockMovement> {
        self.movements.get_by_id(id).await
    }

    /// Applies a movement atomically: the stock check, the stock change and
    /// the movement row happen in one remote call.
    ///
    /// # Errors
    /// Returns a validation error for a bad form, and
    /// [`ErpError::InsufficientStock`] if an outgoing movement exceeds the
    /// stock on hand.
    #[instrument(skip(self, form), fields(supply_id = %form.supply_id))]
    pub async fn record_movement(&self, form: &MovementForm, user_id: &str) -> Result<StockMovement> {
        form.validate()?;
        if user_id.is_empty() {
            return Err(ErpError::Auth("Usuario no autenticado".to_string()));
        }
        let args = json!({
            "p_insumo_id": form.supply_id,
            "p_tipo_movimiento": form.direction,
            "p_cantidad": form.quantity,
            "p_motivo": form.reason,
            "p_referencia": form.reference,
            "p_costo_unitario": form.unit_cost,
            "p_notas": form.notes,
            "p_user_id": user_id,
        });
        let row = self
            .table
            .store()
            .rpc(procedures::REGISTER_SUPPLY_MOVEMENT, args)
            .await?;
        let movement: StockMovement = decode(row)?;
        debug!(movement_id = %movement.id, "Movement recorded");
        Ok(movement)
    }

    /// Statistics over the user's active supplies.
    #[instrument(skip(self))]
    pub async fn statistics(&self, user_id: &str) -> Result<SupplyStatistics> {
        let query = SelectQuery::new()
            .eq("usuario_id", user_id)
            .eq("activo", true);
        let supplies = self.table.select(&query).await?.data;
        Ok(SupplyStatistics::from_supplies(&supplies))
    }
}

impl Deref for SupplyService {
    type Target = TableService<Supply>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}
