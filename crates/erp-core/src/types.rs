//! Core business records.
//!
//! This module defines the records owned by the remote store:
//!
//! - [`Client`] - Customer record
//! - [`Product`] - Finished-goods inventory item
//! - [`Sale`] - Sale header
//! - [`Collection`] - Receivable tied to a sale
//! - [`Supply`] - Consumable input tracked by stock (insumo)
//! - [`StockMovement`] - Immutable in/out movement of a supply
//! - [`LowStockSupply`] - Supply at or below its reorder threshold
//! - [`ProductionRecord`] - A recorded production run
//!
//! Field names follow Rust conventions; the serialized names follow the
//! hosted schema's column names.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErpError, Result};

/// Stock at or below which a product is reported as low.
pub const MIN_STOCK_ALERT: f64 = 5.0;

/// Default number of rows shown in the recent-sales list.
pub const RECENT_SALES_LIMIT: u32 = 10;

/// Currency of an amount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Venezuelan bolívar.
    #[default]
    Ves,
    /// US dollar.
    Usd,
}

impl Currency {
    /// Formats an amount with the currency symbol and two decimals.
    #[must_use]
    pub fn format(&self, amount: f64) -> String {
        match self {
            Self::Usd => format!("${amount:.2}"),
            Self::Ves => format!("Bs.{amount:.2}"),
        }
    }
}

/// Stock level classification used by list views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    /// Nothing left.
    OutOfStock,
    /// At or below the minimum.
    Low,
    /// Above the minimum.
    InStock,
}

impl StockStatus {
    /// Classifies a stock level against its minimum.
    #[must_use]
    pub fn classify(current: f64, minimum: f64) -> Self {
        if current <= 0.0 {
            Self::OutOfStock
        } else if current <= minimum {
            Self::Low
        } else {
            Self::InStock
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OutOfStock => "Sin stock",
            Self::Low => "Bajo stock",
            Self::InStock => "En stock",
        };
        f.write_str(label)
    }
}

/// A customer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(rename = "nombre")]
    pub name: String,
    /// Contact e-mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact phone.
    #[serde(rename = "telefono", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(rename = "direccion", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Creation timestamp, assigned by the store.
    #[serde(rename = "fecha_creacion", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Creates a new client payload with just a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the e-mail.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the phone number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

/// A finished-goods inventory item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Product name.
    #[serde(rename = "nombre_producto")]
    pub name: String,
    /// Free-text description.
    #[serde(rename = "descripcion", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Product category.
    #[serde(rename = "categoria", default)]
    pub category: String,
    /// Units on hand.
    pub stock: f64,
    /// Unit price.
    #[serde(rename = "precio", default)]
    pub price: f64,
    /// Price currency.
    #[serde(rename = "moneda", default)]
    pub currency: Currency,
    /// Unit of measure (e.g. "kg").
    #[serde(rename = "unidad", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Creation timestamp, assigned by the store.
    #[serde(rename = "fecha_creacion", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Creates a product payload.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>, stock: f64) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            stock,
            ..Default::default()
        }
    }

    /// Returns true if the stock is at or below [`MIN_STOCK_ALERT`].
    #[must_use]
    pub fn is_low_stock(&self) -> bool {
        self.stock <= MIN_STOCK_ALERT
    }
}

/// Lifecycle state of a sale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaleStatus {
    /// Awaiting processing.
    #[default]
    #[serde(rename = "pendiente")]
    Pending,
    /// Being prepared.
    #[serde(rename = "procesando")]
    Processing,
    /// Shipped to the customer.
    #[serde(rename = "enviado")]
    Shipped,
    /// Delivered and closed.
    #[serde(rename = "completado")]
    Completed,
    /// Cancelled.
    #[serde(rename = "cancelado")]
    Cancelled,
}

/// A sale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Customer id, if the sale is tied to a registered client.
    #[serde(rename = "cliente_id", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Customer display name.
    #[serde(rename = "cliente", default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Sale total.
    pub total: f64,
    /// Currency of the total.
    #[serde(rename = "moneda", default)]
    pub currency: Currency,
    /// Current state.
    #[serde(rename = "estado", default)]
    pub status: SaleStatus,
    /// Date of the sale.
    #[serde(rename = "fecha", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Creation timestamp, assigned by the store.
    #[serde(rename = "fecha_creacion", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// State of a receivable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionStatus {
    /// Nothing paid yet.
    #[default]
    #[serde(rename = "pendiente")]
    Pending,
    /// Partially paid.
    #[serde(rename = "parcial")]
    Partial,
    /// Fully paid.
    #[serde(rename = "pagado")]
    Paid,
    /// Past its due date.
    #[serde(rename = "vencido")]
    Overdue,
}

/// A receivable (cobranza) tied to a sale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Sale this receivable belongs to.
    #[serde(rename = "venta_id", default, skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<String>,
    /// Customer display name.
    #[serde(rename = "cliente", default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Amount originally owed.
    #[serde(rename = "monto_total")]
    pub total_amount: f64,
    /// Amount still owed.
    #[serde(rename = "monto_pendiente")]
    pub pending_amount: f64,
    /// Current state.
    #[serde(rename = "estado", default)]
    pub status: CollectionStatus,
    /// Due date.
    #[serde(rename = "fecha_vencimiento", default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Creation timestamp, assigned by the store.
    #[serde(rename = "fecha_creacion", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Supply category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupplyCategory {
    /// Raw materials.
    #[serde(rename = "materias_primas")]
    RawMaterials,
    /// Packaging materials.
    #[serde(rename = "embalaje")]
    Packaging,
    /// Labels and wrappers.
    #[serde(rename = "etiquetas")]
    Labels,
    /// Chemicals.
    #[serde(rename = "quimicos")]
    Chemicals,
    /// Tools and equipment.
    #[serde(rename = "herramientas")]
    Tools,
    /// Spare parts and maintenance.
    #[serde(rename = "mantenimiento")]
    Maintenance,
    /// Anything else.
    #[default]
    #[serde(rename = "otros")]
    Other,
}

impl SupplyCategory {
    /// Returns the serialized (column) value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawMaterials => "materias_primas",
            Self::Packaging => "embalaje",
            Self::Labels => "etiquetas",
            Self::Chemicals => "quimicos",
            Self::Tools => "herramientas",
            Self::Maintenance => "mantenimiento",
            Self::Other => "otros",
        }
    }
}

/// Unit of measure for supplies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Kilograms.
    #[default]
    #[serde(rename = "kg")]
    Kilogram,
    /// Grams.
    #[serde(rename = "g")]
    Gram,
    /// Litres.
    #[serde(rename = "l")]
    Litre,
    /// Millilitres.
    #[serde(rename = "ml")]
    Millilitre,
    /// Individual units.
    #[serde(rename = "unidad")]
    Piece,
    /// Boxes.
    #[serde(rename = "caja")]
    Box,
    /// Packs.
    #[serde(rename = "paquete")]
    Pack,
    /// Rolls.
    #[serde(rename = "rollo")]
    Roll,
    /// Bottles.
    #[serde(rename = "botella")]
    Bottle,
    /// Sacks.
    #[serde(rename = "saco")]
    Sack,
}

/// A consumable input tracked by stock quantity.
///
/// `current_stock` is never negative after a successful stock movement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Supply {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Supply name.
    #[serde(rename = "nombre_insumo")]
    pub name: String,
    /// Free-text description.
    #[serde(rename = "descripcion", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category.
    #[serde(rename = "categoria", default)]
    pub category: SupplyCategory,
    /// Unit of measure.
    #[serde(rename = "unidad_medida", default)]
    pub unit: Unit,
    /// Stock on hand.
    #[serde(rename = "stock_actual")]
    pub current_stock: f64,
    /// Reorder threshold.
    #[serde(rename = "stock_minimo", default)]
    pub min_stock: f64,
    /// Cost per unit.
    #[serde(rename = "costo_unitario", default)]
    pub unit_cost: f64,
    /// Currency of the unit cost.
    #[serde(rename = "moneda", default)]
    pub currency: Currency,
    /// Supplier name.
    #[serde(rename = "proveedor", default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    /// Storage location.
    #[serde(rename = "ubicacion", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Date the purchase was expensed.
    #[serde(rename = "fecha_gasto", default, skip_serializing_if = "Option::is_none")]
    pub expense_date: Option<NaiveDate>,
    /// Creation timestamp.
    #[serde(rename = "fecha_creacion", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(rename = "fecha_actualizacion", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Owner.
    #[serde(rename = "usuario_id", default)]
    pub user_id: String,
    /// Soft-delete flag.
    #[serde(rename = "activo", default = "default_true")]
    pub active: bool,
}

const fn default_true() -> bool {
    true
}

impl Supply {
    /// Stock value in the supply's currency.
    #[must_use]
    pub fn total_value(&self) -> f64 {
        self.current_stock * self.unit_cost
    }

    /// Classifies the current stock against the minimum.
    #[must_use]
    pub fn stock_status(&self) -> StockStatus {
        StockStatus::classify(self.current_stock, self.min_stock)
    }
}

/// A supply at or below its minimum stock, as reported by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LowStockSupply {
    /// Supply id.
    pub id: String,
    /// Supply name.
    #[serde(rename = "nombre_insumo")]
    pub name: String,
    /// Stock on hand.
    #[serde(rename = "stock_actual")]
    pub current_stock: f64,
    /// Reorder threshold.
    #[serde(rename = "stock_minimo")]
    pub min_stock: f64,
    /// How far below the minimum the stock is.
    #[serde(rename = "diferencia")]
    pub shortfall: f64,
}

/// Input for creating a supply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplyForm {
    /// Supply name.
    #[serde(rename = "nombre_insumo")]
    pub name: String,
    /// Free-text description.
    #[serde(rename = "descripcion", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category.
    #[serde(rename = "categoria")]
    pub category: SupplyCategory,
    /// Unit of measure.
    #[serde(rename = "unidad_medida")]
    pub unit: Unit,
    /// Initial stock.
    #[serde(rename = "stock_actual")]
    pub current_stock: f64,
    /// Reorder threshold.
    #[serde(rename = "stock_minimo")]
    pub min_stock: f64,
    /// Cost per unit.
    #[serde(rename = "costo_unitario")]
    pub unit_cost: f64,
    /// Currency of the unit cost.
    #[serde(rename = "moneda")]
    pub currency: Currency,
    /// Supplier name.
    #[serde(rename = "proveedor", default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    /// Storage location.
    #[serde(rename = "ubicacion", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Date the purchase was expensed.
    #[serde(rename = "fecha_gasto", default, skip_serializing_if = "Option::is_none")]
    pub expense_date: Option<NaiveDate>,
}

impl SupplyForm {
    /// Creates a form with the required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, category: SupplyCategory, unit: Unit, stock: f64) -> Self {
        Self {
            name: name.into(),
            category,
            unit,
            current_stock: stock,
            ..Default::default()
        }
    }

    /// Sets the minimum stock.
    #[must_use]
    pub const fn with_min_stock(mut self, min_stock: f64) -> Self {
        self.min_stock = min_stock;
        self
    }

    /// Sets the unit cost and currency.
    #[must_use]
    pub const fn with_cost(mut self, unit_cost: f64, currency: Currency) -> Self {
        self.unit_cost = unit_cost;
        self.currency = currency;
        self
    }

    /// Checks the form before it is sent to the store.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ErpError::Validation("Supply name is required".to_string()));
        }
        if self.current_stock < 0.0 || self.min_stock < 0.0 {
            return Err(ErpError::Validation(
                "Stock values cannot be negative".to_string(),
            ));
        }
        if self.unit_cost < 0.0 {
            return Err(ErpError::Validation(
                "Unit cost cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update of a supply. Unset fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplyPatch {
    /// New name.
    #[serde(rename = "nombre_insumo", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(rename = "descripcion", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New category.
    #[serde(rename = "categoria", skip_serializing_if = "Option::is_none")]
    pub category: Option<SupplyCategory>,
    /// New minimum stock.
    #[serde(rename = "stock_minimo", skip_serializing_if = "Option::is_none")]
    pub min_stock: Option<f64>,
    /// New unit cost.
    #[serde(rename = "costo_unitario", skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<f64>,
    /// New supplier.
    #[serde(rename = "proveedor", skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    /// New location.
    #[serde(rename = "ubicacion", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Activate or deactivate.
    #[serde(rename = "activo", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Direction of a stock movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementDirection {
    /// Stock comes in.
    #[serde(rename = "entrada")]
    In,
    /// Stock goes out.
    #[serde(rename = "salida")]
    Out,
}

/// An accepted stock movement. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// The supply that moved.
    #[serde(rename = "insumo_id")]
    pub supply_id: String,
    /// In or out.
    #[serde(rename = "tipo_movimiento")]
    pub direction: MovementDirection,
    /// Quantity moved, always positive.
    #[serde(rename = "cantidad")]
    pub quantity: f64,
    /// Reason for the movement.
    #[serde(rename = "motivo")]
    pub reason: String,
    /// Related record (production id, purchase id, ...).
    #[serde(rename = "referencia", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// When the movement was recorded.
    #[serde(rename = "fecha_movimiento")]
    pub moved_at: DateTime<Utc>,
    /// Who recorded it.
    #[serde(rename = "usuario_id")]
    pub user_id: String,
    /// Unit cost at the time of the movement.
    #[serde(rename = "costo_unitario", default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<f64>,
    /// Free-text notes.
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Input for recording a stock movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementForm {
    /// The supply to move.
    #[serde(rename = "insumo_id")]
    pub supply_id: String,
    /// In or out.
    #[serde(rename = "tipo_movimiento")]
    pub direction: MovementDirection,
    /// Quantity to move.
    #[serde(rename = "cantidad")]
    pub quantity: f64,
    /// Reason for the movement.
    #[serde(rename = "motivo")]
    pub reason: String,
    /// Related record.
    #[serde(rename = "referencia", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Unit cost at the time of the movement.
    #[serde(rename = "costo_unitario", default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<f64>,
    /// Free-text notes.
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MovementForm {
    /// Creates a movement form.
    #[must_use]
    pub fn new(
        supply_id: impl Into<String>,
        direction: MovementDirection,
        quantity: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            supply_id: supply_id.into(),
            direction,
            quantity,
            reason: reason.into(),
            reference: None,
            unit_cost: None,
            notes: None,
        }
    }

    /// Checks the form before it is sent to the store.
    pub fn validate(&self) -> Result<()> {
        if self.supply_id.is_empty() {
            return Err(ErpError::Validation("Supply id is required".to_string()));
        }
        if self.quantity.is_nan() || self.quantity <= 0.0 {
            return Err(ErpError::Validation(
                "Movement quantity must be greater than zero".to_string(),
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(ErpError::Validation(
                "Movement reason is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A supply consumed by a production run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumedSupply {
    /// The supply consumed.
    #[serde(rename = "producto_insumo_id")]
    pub supply_id: String,
    /// Quantity consumed.
    #[serde(rename = "cantidad_usada")]
    pub quantity: f64,
}

impl ConsumedSupply {
    /// Creates a consumed-supply line.
    #[must_use]
    pub fn new(supply_id: impl Into<String>, quantity: f64) -> Self {
        Self {
            supply_id: supply_id.into(),
            quantity,
        }
    }
}

/// A recorded production run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Inventory product that was produced.
    #[serde(rename = "producto_resultado_id")]
    pub result_product_id: String,
    /// Quantity produced.
    #[serde(rename = "cantidad_producida")]
    pub quantity_produced: f64,
    /// Production date.
    #[serde(rename = "fecha_produccion")]
    pub produced_on: NaiveDate,
    /// Free-text notes.
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Who recorded the run.
    #[serde(default)]
    pub user_id: String,
    /// Supplies consumed, in request order.
    #[serde(rename = "insumos", default)]
    pub consumed: Vec<ConsumedSupply>,
}

/// Input for a production run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionRequest {
    /// Inventory product being produced.
    #[serde(rename = "producto_resultado_id")]
    pub result_product_id: String,
    /// Quantity produced.
    #[serde(rename = "cantidad_producida")]
    pub quantity_produced: f64,
    /// Production date.
    #[serde(rename = "fecha_produccion")]
    pub produced_on: NaiveDate,
    /// Free-text notes.
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Supplies consumed.
    #[serde(rename = "insumos")]
    pub supplies: Vec<ConsumedSupply>,
}

impl ProductionRequest {
    /// Creates a request with no consumed supplies.
    #[must_use]
    pub fn new(result_product_id: impl Into<String>, quantity: f64, produced_on: NaiveDate) -> Self {
        Self {
            result_product_id: result_product_id.into(),
            quantity_produced: quantity,
            produced_on,
            notes: None,
            supplies: Vec::new(),
        }
    }

    /// Adds a consumed supply line.
    #[must_use]
    pub fn consume(mut self, supply_id: impl Into<String>, quantity: f64) -> Self {
        self.supplies.push(ConsumedSupply::new(supply_id, quantity));
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_supply_uses_schema_column_names() {
        let supply: Supply = serde_json::from_value(json!({
            "id": "s1",
            "nombre_insumo": "Sacos",
            "categoria": "embalaje",
            "unidad_medida": "saco",
            "stock_actual": 12.0,
            "stock_minimo": 4.0,
            "costo_unitario": 1.5,
            "moneda": "USD",
            "usuario_id": "u1"
        }))
        .unwrap();
        assert_eq!(supply.category, SupplyCategory::Packaging);
        assert_eq!(supply.unit, Unit::Sack);
        assert_eq!(supply.currency, Currency::Usd);
        assert!(supply.active);
        assert_eq!(supply.total_value(), 18.0);
    }

    #[test]
    fn test_stock_status() {
        assert_eq!(StockStatus::classify(0.0, 5.0), StockStatus::OutOfStock);
        assert_eq!(StockStatus::classify(5.0, 5.0), StockStatus::Low);
        assert_eq!(StockStatus::classify(6.0, 5.0), StockStatus::InStock);
        assert_eq!(StockStatus::Low.to_string(), "Bajo stock");
    }

    #[test]
    fn test_currency_format() {
        assert_eq!(Currency::Usd.format(3.456), "$3.46");
        assert_eq!(Currency::Ves.format(10.0), "Bs.10.00");
    }

    #[test]
    fn test_movement_validation() {
        let ok = MovementForm::new("s1", MovementDirection::Out, 2.0, "uso");
        assert!(ok.validate().is_ok());
        let zero = MovementForm::new("s1", MovementDirection::Out, 0.0, "uso");
        assert!(matches!(zero.validate(), Err(ErpError::Validation(_))));
        let nan = MovementForm::new("s1", MovementDirection::In, f64::NAN, "uso");
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_supply_patch_skips_unset_fields() {
        let patch = SupplyPatch {
            min_stock: Some(3.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"stock_minimo": 3.0}));
    }
}
