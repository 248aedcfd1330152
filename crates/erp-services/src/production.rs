//! Production runs.
//!
//! A run consumes supplies and produces a quantity of one inventory
//! product. It moves through a small state machine:
//!
//! ```text
//! Validating -> Reserving -> Recording -> Committed
//!      \            \
//!       `-----------`------> Rejected
//! ```
//!
//! Validation happens locally and rejects before any remote call.
//! Reserving (the stock check and decrement) and Recording (one movement
//! per supply plus the production record) happen in a single
//! `registrar_produccion` call, so either every effect lands or none does.

use erp_core::store::procedures;
use erp_core::{
    ConsumedSupply, ErpError, ProductionRecord, ProductionRequest, RemoteStore, Result,
};
use serde_json::{Value, json};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::table::TableService;

/// A state of a production run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProductionStage {
    /// Checking the request shape.
    Validating,
    /// Checking and decrementing supply stock.
    Reserving,
    /// Writing movements and the production record.
    Recording,
    /// Every effect is stored.
    Committed,
    /// Nothing was stored.
    Rejected,
}

impl fmt::Display for ProductionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Reserving => "reserving",
            Self::Recording => "recording",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// The outcome of one production run, with the path it took.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductionRun {
    stages: Vec<ProductionStage>,
    production_id: Option<String>,
    error: Option<ErpError>,
}

impl ProductionRun {
    fn start() -> Self {
        Self {
            stages: vec![ProductionStage::Validating],
            production_id: None,
            error: None,
        }
    }

    fn advance(&mut self, stage: ProductionStage) {
        debug!(%stage, "Production run advanced");
        self.stages.push(stage);
    }

    fn reject(mut self, error: ErpError) -> Self {
        warn!(error = %error, at = %self.stage(), "Production run rejected");
        self.advance(ProductionStage::Rejected);
        self.error = Some(error);
        self
    }

    fn commit(mut self, production_id: String) -> Self {
        self.advance(ProductionStage::Recording);
        self.advance(ProductionStage::Committed);
        self.production_id = Some(production_id);
        self
    }

    /// Every stage entered, in order.
    #[must_use]
    pub fn stages(&self) -> &[ProductionStage] {
        &self.stages
    }

    /// The final stage.
    #[must_use]
    pub fn stage(&self) -> ProductionStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(ProductionStage::Validating)
    }

    /// True once every effect is stored.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.stage() == ProductionStage::Committed
    }

    /// The production id, once committed.
    #[must_use]
    pub fn production_id(&self) -> Option<&str> {
        self.production_id.as_deref()
    }

    /// Why the run was rejected.
    #[must_use]
    pub const fn error(&self) -> Option<&ErpError> {
        self.error.as_ref()
    }

    /// The production id, or the rejection error.
    pub fn into_result(self) -> Result<String> {
        match (self.production_id, self.error) {
            (Some(id), _) => Ok(id),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ErpError::Other(
                "Production run did not finish".to_string(),
            )),
        }
    }
}

/// Checks a request and merges repeated supplies by summing quantities.
///
/// # Errors
/// Returns a validation error when the product is missing, the produced or
/// any consumed quantity is not positive, or no supply is consumed.
pub fn validate_request(request: &ProductionRequest) -> Result<ProductionRequest> {
    let positive = |q: f64| q.is_finite() && q > 0.0;

    if request.result_product_id.trim().is_empty() {
        return Err(ErpError::Validation(
            "Result product is required".to_string(),
        ));
    }
    if !positive(request.quantity_produced) {
        return Err(ErpError::Validation(
            "Produced quantity must be greater than zero".to_string(),
        ));
    }
    if request.supplies.is_empty() {
        return Err(ErpError::Validation(
            "At least one supply must be consumed".to_string(),
        ));
    }

    let mut merged: Vec<ConsumedSupply> = Vec::with_capacity(request.supplies.len());
    for line in &request.supplies {
        if line.supply_id.trim().is_empty() {
            return Err(ErpError::Validation("Supply id is required".to_string()));
        }
        if !positive(line.quantity) {
            return Err(ErpError::Validation(format!(
                "Consumed quantity for {} must be greater than zero",
                line.supply_id
            )));
        }
        match merged.iter_mut().find(|m| m.supply_id == line.supply_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(line.clone()),
        }
    }

    Ok(ProductionRequest {
        supplies: merged,
        ..request.clone()
    })
}

/// Reads the production id out of a procedure result.
fn production_id(result: Value) -> Result<String> {
    match result {
        Value::String(id) if !id.is_empty() => Ok(id),
        Value::Object(ref fields) => fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ErpError::Parse(format!("Missing production id in {result}"))),
        Value::Array(rows) => rows
            .into_iter()
            .next()
            .map_or_else(
                || Err(ErpError::Parse("Empty production result".to_string())),
                production_id,
            ),
        other => Err(ErpError::Parse(format!(
            "Unexpected production result: {other}"
        ))),
    }
}

/// Production history and atomic production runs.
#[derive(Debug, Clone)]
pub struct ProductionService {
    table: TableService<ProductionRecord>,
}

impl ProductionService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            table: TableService::new(store),
        }
    }

    /// Runs a production and reports the path it took.
    #[instrument(skip(self, request), fields(product = %request.result_product_id))]
    pub async fn run(&self, request: &ProductionRequest, user_id: &str) -> ProductionRun {
        let mut run = ProductionRun::start();

        if user_id.is_empty() {
            return run.reject(ErpError::Auth("Usuario no autenticado".to_string()));
        }
        let request = match validate_request(request) {
            Ok(request) => request,
            Err(e) => return run.reject(e),
        };

        run.advance(ProductionStage::Reserving);
        let args = json!({
            "p_producto_resultado_id": request.result_product_id,
            "p_cantidad_producida": request.quantity_produced,
            "p_fecha_produccion": request.produced_on,
            "p_notas": request.notes,
            "p_user_id": user_id,
            "p_insumos": request.supplies,
        });
        let result = self
            .table
            .store()
            .rpc(procedures::REGISTER_PRODUCTION, args)
            .await
            .and_then(production_id);

        match result {
            Ok(id) => {
                info!(production_id = %id, supplies = request.supplies.len(), "Production committed");
                run.commit(id)
            }
            Err(e) => run.reject(e),
        }
    }

    /// Registers a production run in one atomic remote call and returns the
    /// production id.
    ///
    /// # Errors
    /// Validation errors are returned without any remote call;
    /// [`ErpError::InsufficientStock`] means no supply was touched.
    pub async fn register_production(
        &self,
        request: &ProductionRequest,
        user_id: &str,
    ) -> Result<String> {
        self.run(request, user_id).await.into_result()
    }
}

impl Deref for ProductionService {
    type Target = TableService<ProductionRecord>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use erp_core::store::tables;
    use erp_core::{Product, Rows, SelectQuery, Supply, SupplyCategory, SupplyForm, Unit};
    use erp_store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts procedure calls on top of an in-memory store.
    #[derive(Debug)]
    struct CountingStore {
        inner: SqliteStore,
        rpc_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RemoteStore for CountingStore {
        fn name(&self) -> &str {
            "counting"
        }

        async fn select(&self, table: &str, query: &SelectQuery) -> Result<Rows> {
            self.inner.select(table, query).await
        }

        async fn insert(&self, table: &str, row: Value) -> Result<Value> {
            self.inner.insert(table, row).await
        }

        async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
            self.inner.update(table, id, patch).await
        }

        async fn delete(&self, table: &str, id: &str) -> Result<()> {
            self.inner.delete(table, id).await
        }

        async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
            self.rpc_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.rpc(function, args).await
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        production: ProductionService,
        supplies: TableService<Supply>,
        products: TableService<Product>,
        flour: String,
        bread: String,
    }

    async fn fixture(flour_stock: f64) -> Fixture {
        let store = Arc::new(CountingStore {
            inner: SqliteStore::in_memory().unwrap(),
            rpc_calls: AtomicUsize::new(0),
        });
        let dyn_store: Arc<dyn RemoteStore> = store.clone();
        let supplies = TableService::<Supply>::new(Arc::clone(&dyn_store));
        let products = TableService::<Product>::new(Arc::clone(&dyn_store));
        let flour = supplies
            .create(&SupplyForm::new("Harina", SupplyCategory::RawMaterials, Unit::Kilogram, flour_stock))
            .await
            .unwrap()
            .id;
        let bread = products
            .create(&Product::new("Pan", "panaderia", 0.0))
            .await
            .unwrap()
            .id;
        Fixture {
            production: ProductionService::new(dyn_store),
            store,
            supplies,
            products,
            flour,
            bread,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_consuming_all_stock_commits() {
        let f = fixture(10.0).await;
        let request = ProductionRequest::new(&f.bread, 20.0, date())
            .consume(&f.flour, 10.0)
            .with_notes("lote 1");

        let run = f.production.run(&request, "u1").await;
        assert!(run.is_committed());
        assert_eq!(
            run.stages(),
            &[
                ProductionStage::Validating,
                ProductionStage::Reserving,
                ProductionStage::Recording,
                ProductionStage::Committed
            ]
        );
        let id = run.production_id().unwrap().to_string();

        assert_eq!(f.supplies.get_by_id(&f.flour).await.unwrap().current_stock, 0.0);
        assert_eq!(f.products.get_by_id(&f.bread).await.unwrap().stock, 20.0);
        let record = f.production.get_by_id(&id).await.unwrap();
        assert_eq!(record.notes.as_deref(), Some("lote 1"));
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.consumed, vec![ConsumedSupply::new(&f.flour, 10.0)]);
        assert_eq!(f.production.get_all(1, 10).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_overdraw_is_rejected_without_effects() {
        let f = fixture(10.0).await;
        let request = ProductionRequest::new(&f.bread, 20.0, date()).consume(&f.flour, 11.0);

        let run = f.production.run(&request, "u1").await;
        assert_eq!(
            run.stages(),
            &[
                ProductionStage::Validating,
                ProductionStage::Reserving,
                ProductionStage::Rejected
            ]
        );
        assert!(matches!(run.error(), Some(ErpError::InsufficientStock { .. })));
        assert_eq!(f.supplies.get_by_id(&f.flour).await.unwrap().current_stock, 10.0);
        assert_eq!(f.products.get_by_id(&f.bread).await.unwrap().stock, 0.0);
        assert_eq!(f.production.get_all(1, 10).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_invalid_requests_never_reach_the_store() {
        let f = fixture(10.0).await;
        let cases = [
            ProductionRequest::new(&f.bread, 0.0, date()).consume(&f.flour, 1.0),
            ProductionRequest::new(&f.bread, 5.0, date()),
            ProductionRequest::new("", 5.0, date()).consume(&f.flour, 1.0),
            ProductionRequest::new(&f.bread, 5.0, date()).consume(&f.flour, -1.0),
        ];
        for request in &cases {
            let run = f.production.run(request, "u1").await;
            assert_eq!(
                run.stages(),
                &[ProductionStage::Validating, ProductionStage::Rejected]
            );
            assert!(matches!(run.error(), Some(ErpError::Validation(_))));
        }
        let unauthenticated = f
            .production
            .register_production(&cases[0], "")
            .await
            .unwrap_err();
        assert!(matches!(unauthenticated, ErpError::Auth(_)));
        assert_eq!(f.store.rpc_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repeated_supplies_are_merged() {
        let request = ProductionRequest::new("pan", 1.0, date())
            .consume("harina", 2.0)
            .consume("sal", 1.0)
            .consume("harina", 3.0);
        let merged = validate_request(&request).unwrap();
        assert_eq!(
            merged.supplies,
            vec![ConsumedSupply::new("harina", 5.0), ConsumedSupply::new("sal", 1.0)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_runs_on_shared_supply() {
        let f = fixture(10.0).await;
        let request = ProductionRequest::new(&f.bread, 1.0, date()).consume(&f.flour, 6.0);

        let (a, b) = tokio::join!(
            f.production.register_production(&request, "u1"),
            f.production.register_production(&request, "u2"),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ErpError::InsufficientStock { .. }))));
        assert_eq!(f.supplies.get_by_id(&f.flour).await.unwrap().current_stock, 4.0);
        assert_eq!(f.production.get_all(1, 10).await.unwrap().count, 1);

        let movements = f
            .store
            .select(tables::SUPPLY_MOVEMENTS, &SelectQuery::new())
            .await
            .unwrap();
        assert_eq!(movements.count, 1);
    }

    #[test]
    fn test_production_id_shapes() {
        assert_eq!(production_id(json!("p1")).unwrap(), "p1");
        assert_eq!(production_id(json!({"id": "p2"})).unwrap(), "p2");
        assert_eq!(production_id(json!([{"id": "p3"}])).unwrap(), "p3");
        assert!(production_id(json!(null)).is_err());
    }
}
