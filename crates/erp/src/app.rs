//! The [`Erp`] handle: cached reads and coordinated writes over one store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use erp_core::{
    AuthProvider, AuthState, Client, Clock, Collection, ErpError, LowStockSupply, MovementForm,
    Page, Product, ProductionRecord, ProductionRequest, RemoteStore, Resource, Result, Sale,
    Session, StockMovement, Supply, SupplyCategory, SupplyForm, SupplyPatch, User,
};
use erp_query::{
    CacheConfig, InvalidationRules, LifecycleEvent, MaintenanceReport, MutationCoordinator,
    QueryCache, QueryState, Subscription,
};
use erp_services::{Services, SupplyStatistics};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::dashboard::DashboardSummary;
use crate::keys;

/// Turns a service call into a cache fetcher that owns a service handle.
fn fetch_with<S, T, F, Fut>(service: &S, call: F) -> impl Fn() -> Fut + Send + Sync + 'static
where
    S: Clone + Send + Sync + 'static,
    F: Fn(S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let service = service.clone();
    move || call(service.clone())
}

fn rejected<T>(error: ErpError) -> QueryState<T> {
    QueryState {
        error: Some(error),
        ..QueryState::default()
    }
}

/// Builder for [`Erp`].
///
/// A store and an auth provider are required; everything else has a
/// default.
#[derive(Debug, Default)]
pub struct ErpBuilder {
    store: Option<Arc<dyn RemoteStore>>,
    auth: Option<Arc<dyn AuthProvider>>,
    config: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
    rules: Option<InvalidationRules>,
}

impl ErpBuilder {
    /// Creates a builder with the default cache configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the auth provider.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Uses an embedded SQLite database for both data and auth.
    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn with_sqlite(mut self, store: erp_store::SqliteStore) -> Self {
        self.auth = Some(Arc::new(store.auth()));
        self.store = Some(Arc::new(store));
        self
    }

    /// Uses the hosted table and auth APIs.
    #[cfg(feature = "rest")]
    #[must_use]
    pub fn with_rest(mut self, client: &erp_rest::RestClient) -> Self {
        self.auth = Some(Arc::new(client.auth()));
        self.store = Some(Arc::new(client.store()));
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock the cache measures staleness with.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the invalidation rules.
    #[must_use]
    pub fn with_rules(mut self, rules: InvalidationRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Loads the current session and assembles the handle.
    ///
    /// # Errors
    /// Returns [`ErpError::Other`] if the store or auth provider is missing,
    /// or the provider's error if the session cannot be read.
    pub async fn build(self) -> Result<Erp> {
        let store = self
            .store
            .ok_or_else(|| ErpError::Other("No remote store configured".to_string()))?;
        let provider = self
            .auth
            .ok_or_else(|| ErpError::Other("No auth provider configured".to_string()))?;

        let cache = match self.clock {
            Some(clock) => QueryCache::with_clock(self.config, clock),
            None => QueryCache::new(self.config),
        };
        let mutations = MutationCoordinator::new(cache.clone())
            .with_rules(self.rules.unwrap_or_default());
        let auth = AuthState::start(Arc::clone(&provider)).await?;

        info!(store = store.name(), "ERP client ready");
        Ok(Erp {
            services: Services::new(Arc::clone(&store)),
            store,
            provider,
            auth: Arc::new(auth),
            cache,
            mutations,
        })
    }
}

/// Cached, coordinated access to every business resource.
///
/// Reads return a [`QueryState`]: cached data is served immediately and
/// refreshed in the background once stale. Writes report their own result
/// and invalidate the affected keys only after the store confirms them.
#[derive(Debug, Clone)]
pub struct Erp {
    store: Arc<dyn RemoteStore>,
    provider: Arc<dyn AuthProvider>,
    auth: Arc<AuthState>,
    services: Services,
    cache: QueryCache,
    mutations: MutationCoordinator,
}

impl Erp {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ErpBuilder {
        ErpBuilder::new()
    }

    /// The remote store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// The uncached services.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// The query cache.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The mutation coordinator.
    #[must_use]
    pub const fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    /// The signed-in user state.
    #[must_use]
    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.auth.current_user()
    }

    // Auth

    /// Signs in and waits until the user state reflects the new session.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.provider.sign_in(email, password).await?;
        let user_id = session.user.id.clone();
        self.auth
            .watch()
            .wait_for(|user| user.as_ref().is_some_and(|u| u.id == user_id))
            .await
            .map_err(|e| ErpError::Auth(e.to_string()))?;
        Ok(session)
    }

    /// Registers a user.
    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User> {
        self.provider.sign_up(email, password, name).await
    }

    /// Signs out and drops every cached entry.
    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await?;
        self.auth
            .watch()
            .wait_for(Option::is_none)
            .await
            .map_err(|e| ErpError::Auth(e.to_string()))?;
        self.cache.clear();
        debug!("Signed out, cache cleared");
        Ok(())
    }

    /// Requests a password-reset e-mail.
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        self.provider.reset_password(email).await
    }

    // Reads

    /// One page of clients, newest first.
    pub async fn clients(&self, page: u32, limit: u32) -> QueryState<Page<Client>> {
        let fetch = fetch_with(&self.services.clients, move |clients| async move {
            clients.get_all(page, limit).await
        });
        self.cache.read(keys::clients(page, limit), fetch).await
    }

    /// Clients matching `term` by name, e-mail or phone.
    pub async fn search_clients(&self, term: &str, page: u32, limit: u32) -> QueryState<Page<Client>> {
        let term = term.trim().to_string();
        let key = keys::client_search(&term, page, limit);
        let fetch = fetch_with(&self.services.clients, move |clients| {
            let term = term.clone();
            async move { clients.search(&term, page, limit).await }
        });
        self.cache.read(key, fetch).await
    }

    /// One client.
    pub async fn client(&self, id: &str) -> QueryState<Client> {
        let owned = id.to_string();
        let fetch = fetch_with(&self.services.clients, move |clients| {
            let id = owned.clone();
            async move { clients.get_by_id(&id).await }
        });
        self.cache.read(keys::client(id), fetch).await
    }

    /// One page of finished goods.
    pub async fn products(&self, page: u32, limit: u32) -> QueryState<Page<Product>> {
        let fetch = fetch_with(&self.services.inventory, move |inventory| async move {
            inventory.get_all(page, limit).await
        });
        self.cache.read(keys::products(page, limit), fetch).await
    }

    /// Finished goods at or below the stock alert.
    pub async fn low_stock_products(&self) -> QueryState<Vec<Product>> {
        let fetch = fetch_with(&self.services.inventory, |inventory| async move {
            inventory.low_stock().await
        });
        self.cache.read(keys::low_stock_products(), fetch).await
    }

    /// One page of supplies.
    pub async fn supplies(&self, page: u32, limit: u32) -> QueryState<Page<Supply>> {
        let fetch = fetch_with(&self.services.supplies, move |supplies| async move {
            supplies.get_all(page, limit).await
        });
        self.cache.read(keys::supplies(page, limit), fetch).await
    }

    /// One supply.
    pub async fn supply(&self, id: &str) -> QueryState<Supply> {
        let owned = id.to_string();
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let id = owned.clone();
            async move { supplies.get_by_id(&id).await }
        });
        self.cache.read(keys::supply(id), fetch).await
    }

    /// The signed-in user's active supplies of one category.
    pub async fn supplies_by_category(&self, category: SupplyCategory) -> QueryState<Vec<Supply>> {
        let user = match self.auth.require_user() {
            Ok(user) => user,
            Err(e) => return rejected(e),
        };
        let key = keys::supplies_by_category(category, &user.id);
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let user_id = user.id.clone();
            async move { supplies.by_category(category, &user_id).await }
        });
        self.cache.read(key, fetch).await
    }

    /// Statistics over the signed-in user's supplies.
    pub async fn supply_statistics(&self) -> QueryState<SupplyStatistics> {
        let user = match self.auth.require_user() {
            Ok(user) => user,
            Err(e) => return rejected(e),
        };
        let key = keys::supply_statistics(&user.id);
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let user_id = user.id.clone();
            async move { supplies.statistics(&user_id).await }
        });
        self.cache.read(key, fetch).await
    }

    /// The signed-in user's supplies at or below their minimum.
    pub async fn low_stock_supplies(&self) -> QueryState<Vec<LowStockSupply>> {
        let user = match self.auth.require_user() {
            Ok(user) => user,
            Err(e) => return rejected(e),
        };
        let key = keys::low_stock_supplies(&user.id);
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let user_id = user.id.clone();
            async move { supplies.low_stock(&user_id).await }
        });
        self.cache.read(key, fetch).await
    }

    /// Movements of one supply, newest first.
    pub async fn supply_movements(
        &self,
        supply_id: &str,
        page: u32,
        limit: u32,
    ) -> QueryState<Page<StockMovement>> {
        let owned = supply_id.to_string();
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let supply_id = owned.clone();
            async move { supplies.movements(&supply_id, page, limit).await }
        });
        self.cache
            .read(keys::supply_movements(supply_id, page, limit), fetch)
            .await
    }

    /// Movements recorded by the signed-in user, newest first.
    pub async fn all_supply_movements(&self, page: u32, limit: u32) -> QueryState<Page<StockMovement>> {
        let user = match self.auth.require_user() {
            Ok(user) => user,
            Err(e) => return rejected(e),
        };
        let key = keys::user_supply_movements(&user.id, page, limit);
        let fetch = fetch_with(&self.services.supplies, move |supplies| {
            let user_id = user.id.clone();
            async move { supplies.all_movements(&user_id, page, limit).await }
        });
        self.cache.read(key, fetch).await
    }

    /// One page of sales.
    pub async fn sales(&self, page: u32, limit: u32) -> QueryState<Page<Sale>> {
        let fetch = fetch_with(&self.services.sales, move |sales| async move {
            sales.get_all(page, limit).await
        });
        self.cache.read(keys::sales(page, limit), fetch).await
    }

    /// The newest `limit` sales.
    pub async fn recent_sales(&self, limit: u32) -> QueryState<Vec<Sale>> {
        let fetch = fetch_with(&self.services.sales, move |sales| async move {
            sales.recent(Some(limit)).await
        });
        self.cache.read(keys::recent_sales(limit), fetch).await
    }

    /// Keeps the recent-sales list subscribed, so it is polled while the
    /// subscription lives.
    #[must_use]
    pub fn subscribe_recent_sales(&self, limit: u32) -> Subscription {
        let fetch = fetch_with(&self.services.sales, move |sales| async move {
            sales.recent(Some(limit)).await
        });
        self.cache.subscribe(keys::recent_sales(limit), fetch)
    }

    /// One page of receivables.
    pub async fn collections(&self, page: u32, limit: u32) -> QueryState<Page<Collection>> {
        let fetch = fetch_with(&self.services.collections, move |collections| async move {
            collections.get_all(page, limit).await
        });
        self.cache.read(keys::collections(page, limit), fetch).await
    }

    /// Receivables not fully paid.
    pub async fn pending_collections(&self) -> QueryState<Vec<Collection>> {
        let fetch = fetch_with(&self.services.collections, |collections| async move {
            collections.pending().await
        });
        self.cache.read(keys::pending_collections(), fetch).await
    }

    /// One page of production history.
    pub async fn production_history(&self, page: u32, limit: u32) -> QueryState<Page<ProductionRecord>> {
        let fetch = fetch_with(&self.services.production, move |production| async move {
            production.get_all(page, limit).await
        });
        self.cache.read(keys::production(page, limit), fetch).await
    }

    /// Sales, stock and receivable totals.
    pub async fn dashboard(&self) -> QueryState<DashboardSummary> {
        let fetch = fetch_with(&self.services, |services| async move {
            DashboardSummary::load(&services).await
        });
        self.cache.read(keys::dashboard(), fetch).await
    }

    // Writes

    /// Creates a client.
    pub async fn create_client(&self, client: &Client) -> Result<Client> {
        self.mutations
            .mutate_resource(Resource::Clients, || self.services.clients.create(client))
            .await
    }

    /// Updates a client.
    pub async fn update_client<P>(&self, id: &str, patch: &P) -> Result<Client>
    where
        P: Serialize + ?Sized + Sync,
    {
        self.mutations
            .mutate_resource(Resource::Clients, || self.services.clients.update(id, patch))
            .await
    }

    /// Deletes a client.
    pub async fn delete_client(&self, id: &str) -> Result<()> {
        self.mutations
            .mutate_resource(Resource::Clients, || self.services.clients.delete(id))
            .await
    }

    /// Creates a finished-goods item.
    pub async fn create_product(&self, product: &Product) -> Result<Product> {
        self.mutations
            .mutate_resource(Resource::Inventory, || self.services.inventory.create(product))
            .await
    }

    /// Updates a finished-goods item.
    pub async fn update_product<P>(&self, id: &str, patch: &P) -> Result<Product>
    where
        P: Serialize + ?Sized + Sync,
    {
        self.mutations
            .mutate_resource(Resource::Inventory, || self.services.inventory.update(id, patch))
            .await
    }

    /// Sets the stock of a finished-goods item.
    pub async fn update_stock(&self, id: &str, stock: f64) -> Result<Product> {
        self.mutations
            .mutate_resource(Resource::Inventory, || {
                self.services.inventory.update_stock(id, stock)
            })
            .await
    }

    /// Deletes a finished-goods item.
    pub async fn delete_product(&self, id: &str) -> Result<()> {
        self.mutations
            .mutate_resource(Resource::Inventory, || self.services.inventory.delete(id))
            .await
    }

    /// Creates a supply owned by the signed-in user.
    pub async fn create_supply(&self, form: &SupplyForm) -> Result<Supply> {
        let supplies = &self.services.supplies;
        self.mutations
            .mutate_authenticated(&self.auth, Resource::Supplies, move |user| async move {
                supplies.create_for_user(form, &user.id).await
            })
            .await
    }

    /// Updates a supply.
    pub async fn update_supply(&self, id: &str, patch: &SupplyPatch) -> Result<Supply> {
        self.mutations
            .mutate_resource(Resource::Supplies, || self.services.supplies.update(id, patch))
            .await
    }

    /// Deletes a supply.
    pub async fn delete_supply(&self, id: &str) -> Result<()> {
        self.mutations
            .mutate_resource(Resource::Supplies, || self.services.supplies.delete(id))
            .await
    }

    /// Records a stock movement for the signed-in user.
    pub async fn record_movement(&self, form: &MovementForm) -> Result<StockMovement> {
        let supplies = &self.services.supplies;
        self.mutations
            .mutate_authenticated(&self.auth, Resource::SupplyMovements, move |user| async move {
                supplies.record_movement(form, &user.id).await
            })
            .await
    }

    /// Creates a sale.
    pub async fn create_sale(&self, sale: &Sale) -> Result<Sale> {
        self.mutations
            .mutate_resource(Resource::Sales, || self.services.sales.create(sale))
            .await
    }

    /// Updates a sale.
    pub async fn update_sale<P>(&self, id: &str, patch: &P) -> Result<Sale>
    where
        P: Serialize + ?Sized + Sync,
    {
        self.mutations
            .mutate_resource(Resource::Sales, || self.services.sales.update(id, patch))
            .await
    }

    /// Deletes a sale.
    pub async fn delete_sale(&self, id: &str) -> Result<()> {
        self.mutations
            .mutate_resource(Resource::Sales, || self.services.sales.delete(id))
            .await
    }

    /// Creates a receivable.
    pub async fn create_collection(&self, collection: &Collection) -> Result<Collection> {
        self.mutations
            .mutate_resource(Resource::Collections, || {
                self.services.collections.create(collection)
            })
            .await
    }

    /// Updates a receivable.
    pub async fn update_collection<P>(&self, id: &str, patch: &P) -> Result<Collection>
    where
        P: Serialize + ?Sized + Sync,
    {
        self.mutations
            .mutate_resource(Resource::Collections, || {
                self.services.collections.update(id, patch)
            })
            .await
    }

    /// Deletes a receivable.
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        self.mutations
            .mutate_resource(Resource::Collections, || self.services.collections.delete(id))
            .await
    }

    /// Registers a production run for the signed-in user and returns its
    /// id. Either every stock change is applied or none is.
    #[instrument(skip(self, request), fields(product = %request.result_product_id))]
    pub async fn register_production(&self, request: &ProductionRequest) -> Result<String> {
        let production = &self.services.production;
        self.mutations
            .mutate_authenticated(&self.auth, Resource::Production, move |user| async move {
                production.register_production(request, &user.id).await
            })
            .await
    }

    // Lifecycle

    /// Forwards a focus or reconnect signal to the cache.
    pub fn handle(&self, event: LifecycleEvent) -> usize {
        self.cache.handle(event)
    }

    /// One polling and eviction step.
    pub fn tick(&self) -> MaintenanceReport {
        self.cache.tick()
    }

    /// Runs [`Self::tick`] every `period` in the background.
    pub fn spawn_maintenance(&self, period: Duration) -> JoinHandle<()> {
        self.cache.spawn_maintenance(period)
    }
}
