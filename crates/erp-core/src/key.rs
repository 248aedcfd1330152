//! Structured cache keys and resource tags.
//!
//! A [`QueryKey`] is an ordered tuple whose first part is a resource tag
//! (see [`Resource`]) followed by sub-tags and parameter values, e.g.
//! `sales/recent/10` or `supplies/2/10`. Invalidation works on key
//! prefixes, so `supplies` matches every supplies key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ErpError;

/// Business resource families, used as the root tag of every key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    /// Customer records.
    Clients,
    /// Finished-goods inventory (products).
    Inventory,
    /// Consumable supplies (insumos).
    Supplies,
    /// Supply stock movements.
    SupplyMovements,
    /// Sales.
    Sales,
    /// Collections (accounts receivable).
    Collections,
    /// Production runs.
    Production,
    /// Application configuration.
    Config,
    /// Aggregated dashboard figures.
    Dashboard,
}

impl Resource {
    /// All resources, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Clients,
        Self::Inventory,
        Self::Supplies,
        Self::SupplyMovements,
        Self::Sales,
        Self::Collections,
        Self::Production,
        Self::Config,
        Self::Dashboard,
    ];

    /// Returns the tag used as the first part of cache keys.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Inventory => "inventory",
            Self::Supplies => "supplies",
            Self::SupplyMovements => "supply-movements",
            Self::Sales => "sales",
            Self::Collections => "collections",
            Self::Production => "production",
            Self::Config => "config",
            Self::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Resource {
    type Err = ErpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.tag() == s)
            .ok_or_else(|| ErpError::Validation(format!("Unknown resource tag: {s}")))
    }
}

/// One element of a [`QueryKey`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// A tag or string parameter (resource tag, sub-tag, id, search term).
    Text(String),
    /// A numeric parameter (page, limit).
    Number(i64),
}

impl KeyPart {
    /// Returns the text value, if this part is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl From<Resource> for KeyPart {
    fn from(r: Resource) -> Self {
        Self::Text(r.tag().to_string())
    }
}

/// Structured identifier of a cacheable read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    /// Creates a key rooted at a resource tag.
    #[must_use]
    pub fn new(resource: Resource) -> Self {
        Self(vec![resource.into()])
    }

    /// Creates a key rooted at an arbitrary tag.
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self(vec![KeyPart::Text(tag.into())])
    }

    /// Appends a part to the key.
    #[must_use]
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Returns the key parts in order.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Returns the root tag, if the first part is text.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.0.first().and_then(KeyPart::as_text)
    }

    /// Returns the resource family of this key, if the root tag names one.
    #[must_use]
    pub fn resource(&self) -> Option<Resource> {
        self.root().and_then(|r| r.parse().ok())
    }

    /// Returns true if any text part equals `tag`.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|p| p.as_text() == Some(tag))
    }

    /// Returns true if `prefix` is a (non-strict) prefix of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<Resource> for QueryKey {
    fn from(r: Resource) -> Self {
        Self::new(r)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching() {
        let key = QueryKey::new(Resource::Supplies).with(2u32).with(10u32);
        assert!(key.starts_with(&Resource::Supplies.into()));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&Resource::SupplyMovements.into()));
        assert!(!QueryKey::new(Resource::Supplies).starts_with(&key));
    }

    #[test]
    fn test_number_and_text_parts_differ() {
        let a = QueryKey::new(Resource::Clients).with(1u32);
        let b = QueryKey::new(Resource::Clients).with("1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_and_resource() {
        let key = QueryKey::new(Resource::Sales).with("recent").with(10u32);
        assert_eq!(key.to_string(), "sales/recent/10");
        assert_eq!(key.resource(), Some(Resource::Sales));
        assert!(key.contains("recent"));
        assert_eq!(QueryKey::tag("misc").resource(), None);
    }

    #[test]
    fn test_resource_round_trips_through_tag() {
        for r in Resource::ALL {
            assert_eq!(r.tag().parse::<Resource>().unwrap(), r);
        }
        assert!("nope".parse::<Resource>().is_err());
    }
}
