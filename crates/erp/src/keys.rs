//! Cache keys for every read the facade exposes.
//!
//! Keys are rooted at their [`Resource`] so that invalidating a resource
//! reaches every page, search and derived figure built from it.

use erp_core::{QueryKey, Resource, SupplyCategory};

/// `clients/{page}/{limit}`
#[must_use]
pub fn clients(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Clients).with(page).with(limit)
}

/// `clients/search/{term}/{page}/{limit}`
#[must_use]
pub fn client_search(term: &str, page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Clients)
        .with("search")
        .with(term.trim())
        .with(page)
        .with(limit)
}

/// `clients/detail/{id}`
#[must_use]
pub fn client(id: &str) -> QueryKey {
    QueryKey::new(Resource::Clients).with("detail").with(id)
}

/// `inventory/{page}/{limit}`
#[must_use]
pub fn products(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Inventory).with(page).with(limit)
}

/// `inventory/low-stock`
#[must_use]
pub fn low_stock_products() -> QueryKey {
    QueryKey::new(Resource::Inventory).with("low-stock")
}

/// `supplies/{page}/{limit}`
#[must_use]
pub fn supplies(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Supplies).with(page).with(limit)
}

/// `supplies/detail/{id}`
#[must_use]
pub fn supply(id: &str) -> QueryKey {
    QueryKey::new(Resource::Supplies).with("detail").with(id)
}

/// `supplies/category/{category}/{user}`
#[must_use]
pub fn supplies_by_category(category: SupplyCategory, user_id: &str) -> QueryKey {
    QueryKey::new(Resource::Supplies)
        .with("category")
        .with(category.as_str())
        .with(user_id)
}

/// `supplies/statistics/{user}`
#[must_use]
pub fn supply_statistics(user_id: &str) -> QueryKey {
    QueryKey::new(Resource::Supplies)
        .with("statistics")
        .with(user_id)
}

/// `supplies/low-stock/{user}`
#[must_use]
pub fn low_stock_supplies(user_id: &str) -> QueryKey {
    QueryKey::new(Resource::Supplies)
        .with("low-stock")
        .with(user_id)
}

/// `supply-movements/{supply}/{page}/{limit}`
#[must_use]
pub fn supply_movements(supply_id: &str, page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::SupplyMovements)
        .with(supply_id)
        .with(page)
        .with(limit)
}

/// `supply-movements/by-user/{user}/{page}/{limit}`
#[must_use]
pub fn user_supply_movements(user_id: &str, page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::SupplyMovements)
        .with("by-user")
        .with(user_id)
        .with(page)
        .with(limit)
}

/// `sales/{page}/{limit}`
#[must_use]
pub fn sales(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Sales).with(page).with(limit)
}

/// `sales/recent/{limit}`
#[must_use]
pub fn recent_sales(limit: u32) -> QueryKey {
    QueryKey::new(Resource::Sales).with("recent").with(limit)
}

/// `collections/{page}/{limit}`
#[must_use]
pub fn collections(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Collections).with(page).with(limit)
}

/// `collections/pending`
#[must_use]
pub fn pending_collections() -> QueryKey {
    QueryKey::new(Resource::Collections).with("pending")
}

/// `production/{page}/{limit}`
#[must_use]
pub fn production(page: u32, limit: u32) -> QueryKey {
    QueryKey::new(Resource::Production).with(page).with(limit)
}

/// `dashboard/statistics`
#[must_use]
pub fn dashboard() -> QueryKey {
    QueryKey::new(Resource::Dashboard).with("statistics")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_render_as_paths() {
        assert_eq!(clients(2, 10).to_string(), "clients/2/10");
        assert_eq!(recent_sales(10).to_string(), "sales/recent/10");
        assert_eq!(supply_statistics("u1").to_string(), "supplies/statistics/u1");
        assert_eq!(dashboard().to_string(), "dashboard/statistics");
        assert_eq!(client_search(" ana ", 1, 10), client_search("ana", 1, 10));
    }

    #[test]
    fn test_resource_prefixes_cover_derived_keys() {
        let supplies_root = QueryKey::new(Resource::Supplies);
        assert!(supply_statistics("u1").starts_with(&supplies_root));
        assert!(low_stock_supplies("u1").starts_with(&supplies_root.clone().with("low-stock")));
        assert!(!supply_movements("s1", 1, 10).starts_with(&supplies_root));
        assert!(supply("s1").starts_with(&supplies_root));
        assert_eq!(
            supplies_by_category(SupplyCategory::Packaging, "u1").to_string(),
            "supplies/category/embalaje/u1"
        );
        assert!(
            user_supply_movements("u1", 1, 10)
                .starts_with(&QueryKey::new(Resource::SupplyMovements))
        );
    }
}
