//! Stored procedures.
//!
//! Each procedure runs inside one `BEGIN IMMEDIATE` transaction, so the
//! stock check and the stock write are a single step: two concurrent calls
//! against the same supply are serialized by SQLite's write lock.

use chrono::{DateTime, NaiveDate, Utc};
use erp_core::store::tables;
use erp_core::{
    ConsumedSupply, ErpError, LowStockSupply, MovementDirection, ProductionRecord, Result,
    StockMovement,
};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sqlite::{insert_row, load_row, sql_err, timestamp};

/// Reason recorded on movements created by a production run.
pub const PRODUCTION_REASON: &str = "produccion";

#[derive(Debug, Deserialize)]
struct ProductionArgs {
    p_producto_resultado_id: String,
    p_cantidad_producida: f64,
    p_fecha_produccion: NaiveDate,
    #[serde(default)]
    p_notas: Option<String>,
    p_user_id: String,
    #[serde(default)]
    p_insumos: Vec<ConsumedSupply>,
}

#[derive(Debug, Deserialize)]
struct MovementArgs {
    p_insumo_id: String,
    p_tipo_movimiento: MovementDirection,
    p_cantidad: f64,
    p_motivo: String,
    #[serde(default)]
    p_referencia: Option<String>,
    #[serde(default)]
    p_costo_unitario: Option<f64>,
    #[serde(default)]
    p_notas: Option<String>,
    p_user_id: String,
}

#[derive(Debug, Deserialize)]
struct LowStockArgs {
    user_id: String,
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Sums quantities of repeated supplies, keeping first-seen order.
fn merge_lines(lines: Vec<ConsumedSupply>) -> Vec<ConsumedSupply> {
    let mut merged: Vec<ConsumedSupply> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|m| m.supply_id == line.supply_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(line),
        }
    }
    merged
}

fn current_stock(tx: &Connection, table: &str, column: &str, id: &str) -> Result<Option<f64>> {
    Ok(load_row(tx, table, id)?
        .map(|row| row.get(column).and_then(Value::as_f64).unwrap_or_default()))
}

/// Decrements a supply's stock if enough is on hand.
fn withdraw(tx: &Transaction<'_>, supply_id: &str, quantity: f64) -> Result<()> {
    let changed = tx
        .execute(
            "UPDATE rows
             SET data = json_set(data, '$.stock_actual',
                                 json_extract(data, '$.stock_actual') - ?3)
             WHERE tbl = ?1 AND id = ?2
               AND json_extract(data, '$.stock_actual') >= ?3",
            params![tables::SUPPLIES, supply_id, quantity],
        )
        .map_err(sql_err)?;
    if changed == 1 {
        return Ok(());
    }
    match current_stock(tx, tables::SUPPLIES, "stock_actual", supply_id)? {
        None => Err(ErpError::not_found(tables::SUPPLIES, supply_id)),
        Some(available) => Err(ErpError::InsufficientStock {
            supply_id: supply_id.to_string(),
            available,
            requested: quantity,
        }),
    }
}

/// Increments a numeric stock column.
fn deposit(tx: &Transaction<'_>, table: &str, column: &str, id: &str, quantity: f64) -> Result<()> {
    let path = format!("$.{column}");
    let changed = tx
        .execute(
            "UPDATE rows
             SET data = json_set(data, ?3, coalesce(json_extract(data, ?3), 0) + ?4)
             WHERE tbl = ?1 AND id = ?2",
            params![table, id, path, quantity],
        )
        .map_err(sql_err)?;
    if changed == 0 {
        return Err(ErpError::not_found(table, id));
    }
    Ok(())
}

fn movement_row(movement: &StockMovement, at: DateTime<Utc>) -> Result<Value> {
    let mut row = serde_json::to_value(movement)?;
    row["fecha_movimiento"] = Value::String(timestamp(at));
    Ok(row)
}

/// `registrar_produccion`: consumes supplies, records one movement per
/// supply and the production record, and credits the produced quantity to
/// the result product. Returns the production id.
pub(crate) fn register_production(
    conn: &mut Connection,
    args: Value,
    now: DateTime<Utc>,
) -> Result<Value> {
    let args: ProductionArgs = serde_json::from_value(args)?;
    if args.p_producto_resultado_id.trim().is_empty() {
        return Err(ErpError::Validation(
            "Result product is required".to_string(),
        ));
    }
    if !positive(args.p_cantidad_producida) {
        return Err(ErpError::Validation(
            "Produced quantity must be greater than zero".to_string(),
        ));
    }
    if args.p_insumos.is_empty() {
        return Err(ErpError::Validation(
            "At least one supply must be consumed".to_string(),
        ));
    }
    if args.p_insumos.iter().any(|line| !positive(line.quantity)) {
        return Err(ErpError::Validation(
            "Consumed quantities must be greater than zero".to_string(),
        ));
    }
    let lines = merge_lines(args.p_insumos);
    let production_id = Uuid::new_v4().to_string();

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_err)?;

    for line in &lines {
        if let Err(e) = withdraw(&tx, &line.supply_id, line.quantity) {
            warn!(supply_id = %line.supply_id, error = %e, "Production rejected");
            return Err(e);
        }
        let movement = StockMovement {
            id: Uuid::new_v4().to_string(),
            supply_id: line.supply_id.clone(),
            direction: MovementDirection::Out,
            quantity: line.quantity,
            reason: PRODUCTION_REASON.to_string(),
            reference: Some(production_id.clone()),
            moved_at: now,
            user_id: args.p_user_id.clone(),
            unit_cost: None,
            notes: None,
        };
        insert_row(&tx, tables::SUPPLY_MOVEMENTS, &movement_row(&movement, now)?)?;
    }

    let record = ProductionRecord {
        id: production_id.clone(),
        result_product_id: args.p_producto_resultado_id,
        quantity_produced: args.p_cantidad_producida,
        produced_on: args.p_fecha_produccion,
        notes: args.p_notas,
        user_id: args.p_user_id,
        consumed: lines,
    };
    insert_row(&tx, tables::PRODUCTION, &serde_json::to_value(&record)?)?;
    deposit(
        &tx,
        tables::INVENTORY,
        "stock",
        &record.result_product_id,
        record.quantity_produced,
    )?;

    tx.commit().map_err(sql_err)?;
    debug!(production_id = %production_id, supplies = record.consumed.len(), "Production committed");
    Ok(Value::String(production_id))
}

/// `registrar_movimiento_insumo`: applies one movement and returns the
/// recorded movement row.
pub(crate) fn register_supply_movement(
    conn: &mut Connection,
    args: Value,
    now: DateTime<Utc>,
) -> Result<Value> {
    let args: MovementArgs = serde_json::from_value(args)?;
    if !positive(args.p_cantidad) {
        return Err(ErpError::Validation(
            "Movement quantity must be greater than zero".to_string(),
        ));
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_err)?;
    match args.p_tipo_movimiento {
        MovementDirection::In => deposit(
            &tx,
            tables::SUPPLIES,
            "stock_actual",
            &args.p_insumo_id,
            args.p_cantidad,
        )?,
        MovementDirection::Out => withdraw(&tx, &args.p_insumo_id, args.p_cantidad)?,
    }
    let movement = StockMovement {
        id: Uuid::new_v4().to_string(),
        supply_id: args.p_insumo_id,
        direction: args.p_tipo_movimiento,
        quantity: args.p_cantidad,
        reason: args.p_motivo,
        reference: args.p_referencia,
        moved_at: now,
        user_id: args.p_user_id,
        unit_cost: args.p_costo_unitario,
        notes: args.p_notas,
    };
    let row = movement_row(&movement, now)?;
    insert_row(&tx, tables::SUPPLY_MOVEMENTS, &row)?;
    tx.execute(
        "UPDATE rows SET data = json_set(data, '$.fecha_actualizacion', ?3)
         WHERE tbl = ?1 AND id = ?2",
        params![tables::SUPPLIES, movement.supply_id, timestamp(now)],
    )
    .map_err(sql_err)?;
    tx.commit().map_err(sql_err)?;
    debug!(movement_id = %movement.id, "Supply movement committed");
    Ok(row)
}

/// `insumos_stock_bajo`: active supplies of a user at or below their
/// minimum stock, lowest stock first.
pub(crate) fn low_stock_supplies(conn: &Connection, args: &Value) -> Result<Value> {
    let args: LowStockArgs = serde_json::from_value(args.clone())?;
    let mut stmt = conn
        .prepare(
            "SELECT id,
                    json_extract(data, '$.nombre_insumo'),
                    coalesce(json_extract(data, '$.stock_actual'), 0),
                    coalesce(json_extract(data, '$.stock_minimo'), 0)
             FROM rows
             WHERE tbl = ?1
               AND json_extract(data, '$.usuario_id') = ?2
               AND coalesce(json_extract(data, '$.activo'), 1) = 1
               AND coalesce(json_extract(data, '$.stock_actual'), 0)
                   <= coalesce(json_extract(data, '$.stock_minimo'), 0)
             ORDER BY coalesce(json_extract(data, '$.stock_actual'), 0) ASC",
        )
        .map_err(sql_err)?;
    let supplies = stmt
        .query_map(params![tables::SUPPLIES, args.user_id], |row| {
            let current_stock: f64 = row.get(2)?;
            let min_stock: f64 = row.get(3)?;
            Ok(LowStockSupply {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                current_stock,
                min_stock,
                shortfall: min_stock - current_stock,
            })
        })
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?;
    Ok(serde_json::to_value(supplies)?)
}
