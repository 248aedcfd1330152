//! Write coordination and cache invalidation.

use erp_core::{AuthState, QueryKey, Resource, Result, User};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, instrument, warn};

use crate::cache::QueryCache;
use crate::retry::RetryPolicy;

/// Maps a mutated resource to the key prefixes its writes make stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRules {
    rules: HashMap<Resource, Vec<QueryKey>>,
}

impl InvalidationRules {
    /// Rules with no entries; every resource invalidates only itself.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Sets the prefixes invalidated when `resource` is written.
    #[must_use]
    pub fn with_rule(mut self, resource: Resource, prefixes: Vec<QueryKey>) -> Self {
        self.rules.insert(resource, prefixes);
        self
    }

    /// Prefixes to invalidate after a successful write to `resource`.
    #[must_use]
    pub fn prefixes(&self, resource: Resource) -> Vec<QueryKey> {
        self.rules
            .get(&resource)
            .cloned()
            .unwrap_or_else(|| vec![resource.into()])
    }
}

impl Default for InvalidationRules {
    fn default() -> Self {
        let supplies = || QueryKey::new(Resource::Supplies);
        // Dashboard totals are derived from sales, stock and receivables.
        let dashboard = || QueryKey::new(Resource::Dashboard);
        let supply_derived = || {
            vec![
                supplies().with("statistics"),
                supplies().with("low-stock"),
            ]
        };

        Self::empty()
            .with_rule(Resource::Clients, vec![Resource::Clients.into()])
            .with_rule(
                Resource::Inventory,
                vec![Resource::Inventory.into(), dashboard()],
            )
            .with_rule(
                Resource::Supplies,
                [vec![supplies()], supply_derived()].concat(),
            )
            .with_rule(
                Resource::SupplyMovements,
                [
                    vec![supplies(), Resource::SupplyMovements.into()],
                    supply_derived(),
                ]
                .concat(),
            )
            .with_rule(
                Resource::Sales,
                vec![Resource::Sales.into(), Resource::Inventory.into(), dashboard()],
            )
            .with_rule(
                Resource::Collections,
                vec![Resource::Collections.into(), dashboard()],
            )
            .with_rule(
                Resource::Production,
                vec![
                    Resource::Production.into(),
                    Resource::Inventory.into(),
                    supplies(),
                    Resource::SupplyMovements.into(),
                    dashboard(),
                ],
            )
    }
}

/// Runs writes and invalidates the cache once they are confirmed.
///
/// Writes always use [`RetryPolicy::MUTATIONS`], independent of the cache's
/// read retry policy. Nothing is invalidated on failure, and nothing is invalidated before the
/// write returns. All prefixes of one mutation are invalidated in a single
/// step.
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    cache: QueryCache,
    rules: InvalidationRules,
}

impl MutationCoordinator {
    /// Creates a coordinator with the default rules.
    #[must_use]
    pub fn new(cache: QueryCache) -> Self {
        Self {
            cache,
            rules: InvalidationRules::default(),
        }
    }

    /// Replaces the invalidation rules.
    #[must_use]
    pub fn with_rules(mut self, rules: InvalidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// The cache this coordinator invalidates.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The invalidation rules.
    #[must_use]
    pub const fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    /// Runs `write` (retrying transient failures) and, on success, marks
    /// every key under `affected` stale.
    #[instrument(skip(self, write), fields(affected = affected.len()))]
    pub async fn mutate<T, F, Fut>(&self, affected: &[QueryKey], write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match RetryPolicy::MUTATIONS.run(write).await {
            Ok(value) => {
                let invalidated = self.cache.invalidate_many(affected);
                debug!(invalidated, "Mutation committed");
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "Mutation failed, cache untouched");
                Err(e)
            }
        }
    }

    /// Like [`Self::mutate`], with the affected prefixes taken from the
    /// invalidation rules for `resource`.
    pub async fn mutate_resource<T, F, Fut>(&self, resource: Resource, write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let affected = self.rules.prefixes(resource);
        self.mutate(&affected, write).await
    }

    /// Like [`Self::mutate_resource`], but rejects with an auth error before
    /// any remote call when nobody is signed in.
    pub async fn mutate_authenticated<T, F, Fut>(
        &self,
        auth: &AuthState,
        resource: Resource,
        mut write: F,
    ) -> Result<T>
    where
        F: FnMut(User) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let user = auth.require_user()?;
        self.mutate_resource(resource, || write(user.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CacheConfig;
    use async_trait::async_trait;
    use erp_core::{
        AuthEvents, AuthProvider, AuthSubscription, ErpError, ManualClock, Session,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct SignedOut {
        events: AuthEvents,
    }

    #[async_trait]
    impl AuthProvider for SignedOut {
        async fn get_session(&self) -> Result<Option<Session>> {
            Ok(None)
        }

        fn subscribe(&self) -> AuthSubscription {
            self.events.subscribe()
        }

        async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session> {
            Err(ErpError::Auth("disabled".into()))
        }

        async fn sign_up(&self, _email: &str, _password: &str, _name: &str) -> Result<User> {
            Err(ErpError::Auth("disabled".into()))
        }

        async fn sign_out(&self) -> Result<()> {
            Ok(())
        }

        async fn reset_password(&self, _email: &str) -> Result<()> {
            Ok(())
        }
    }

    fn seeded() -> MutationCoordinator {
        let cache = QueryCache::with_clock(CacheConfig::default(), Arc::new(ManualClock::default()));
        for resource in Resource::ALL {
            cache.set_data(QueryKey::new(resource).with(1u32).with(10u32), 0u32);
        }
        cache.set_data(QueryKey::new(Resource::Supplies).with("statistics"), 0u32);
        MutationCoordinator::new(cache)
    }

    fn stale(coordinator: &MutationCoordinator) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = Resource::ALL
            .into_iter()
            .map(|r| QueryKey::new(r).with(1u32).with(10u32))
            .chain([QueryKey::new(Resource::Supplies).with("statistics")])
            .filter(|k| coordinator.cache().peek::<u32>(k).is_stale)
            .collect();
        keys.sort_by_key(ToString::to_string);
        keys
    }

    #[test]
    fn test_default_rules() {
        let rules = InvalidationRules::default();
        let tags = |r: Resource| -> Vec<String> {
            rules.prefixes(r).iter().map(ToString::to_string).collect()
        };
        assert_eq!(tags(Resource::Sales), vec!["sales", "inventory", "dashboard"]);
        assert_eq!(tags(Resource::Collections), vec!["collections", "dashboard"]);
        assert_eq!(tags(Resource::Clients), vec!["clients"]);
        assert_eq!(
            tags(Resource::SupplyMovements),
            vec![
                "supplies",
                "supply-movements",
                "supplies/statistics",
                "supplies/low-stock"
            ]
        );
        assert_eq!(
            tags(Resource::Production),
            vec![
                "production",
                "inventory",
                "supplies",
                "supply-movements",
                "dashboard"
            ]
        );
        assert_eq!(tags(Resource::Dashboard), vec!["dashboard"]);
    }

    #[tokio::test]
    async fn test_success_invalidates_exactly_the_affected_prefixes() {
        let coordinator = seeded();
        let id = coordinator
            .mutate_resource(Resource::Sales, || async { Ok("v1".to_string()) })
            .await
            .unwrap();
        assert_eq!(id, "v1");
        let keys: Vec<String> = stale(&coordinator).iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["dashboard/1/10", "inventory/1/10", "sales/1/10"]);
    }

    #[tokio::test]
    async fn test_production_invalidates_across_resources() {
        let coordinator = seeded();
        coordinator
            .mutate_resource(Resource::Production, || async { Ok(()) })
            .await
            .unwrap();
        let keys: Vec<String> = stale(&coordinator).iter().map(ToString::to_string).collect();
        assert_eq!(
            keys,
            vec![
                "dashboard/1/10",
                "inventory/1/10",
                "production/1/10",
                "supplies/1/10",
                "supplies/statistics",
                "supply-movements/1/10"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_mutation_changes_nothing() {
        let coordinator = seeded();
        let calls = AtomicUsize::new(0);
        let result: Result<()> = coordinator
            .mutate_resource(Resource::Inventory, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ErpError::Remote("503".into())) }
            })
            .await;
        assert!(result.is_err());
        // One automatic retry for transient failures.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(stale(&coordinator).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retries_ignore_read_policy() {
        let config = CacheConfig::default().with_read_retry(RetryPolicy::NONE);
        let cache = QueryCache::with_clock(config, Arc::new(ManualClock::default()));
        let coordinator = MutationCoordinator::new(cache);
        let calls = AtomicUsize::new(0);
        let result: Result<()> = coordinator
            .mutate_resource(Resource::Clients, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ErpError::Remote("connection reset".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(RetryPolicy::MUTATIONS.max_retries, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logical_rejection_is_not_retried() {
        let coordinator = seeded();
        let calls = AtomicUsize::new(0);
        let result: Result<()> = coordinator
            .mutate_resource(Resource::Supplies, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ErpError::InsufficientStock {
                        supply_id: "s1".into(),
                        available: 1.0,
                        requested: 2.0,
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(ErpError::InsufficientStock { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stale(&coordinator).is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_write_never_runs() {
        let coordinator = seeded();
        let auth = AuthState::start(Arc::new(SignedOut::default())).await.unwrap();
        let calls = AtomicUsize::new(0);
        let result: Result<()> = coordinator
            .mutate_authenticated(&auth, Resource::Supplies, |_user| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(ErpError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(stale(&coordinator).is_empty());
    }
}
