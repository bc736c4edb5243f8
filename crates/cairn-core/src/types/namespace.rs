use crate::error::{CairnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters never allowed in a database name.
const DB_FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];

/// Characters never allowed in a collection name.
const COLLECTION_FORBIDDEN: &[char] = &['$', '/', '\\', '\0'];

/// A `(database, collection)` pair, rendered as `db.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    /// Build a namespace, validating both names.
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let ns = Self {
            db: db.into(),
            collection: collection.into(),
        };
        validate_db_name(&ns.db)?;
        validate_collection_name(&ns.collection)?;
        Ok(ns)
    }

    /// Parse `db.collection`. The first dot separates the two parts, so
    /// collection names may themselves contain dots.
    pub fn parse(full: &str) -> Result<Self> {
        let (db, collection) = full
            .split_once('.')
            .ok_or_else(|| CairnError::Config(format!("Invalid namespace '{}'", full)))?;
        Self::new(db, collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

pub fn validate_db_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CairnError::Config("Database name cannot be empty".into()));
    }
    if let Some(c) = name.chars().find(|c| DB_FORBIDDEN.contains(c)) {
        return Err(CairnError::Config(format!(
            "Database name '{}' contains forbidden character {:?}",
            name, c
        )));
    }
    Ok(())
}

pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CairnError::Config("Collection name cannot be empty".into()));
    }
    if let Some(c) = name.chars().find(|c| COLLECTION_FORBIDDEN.contains(c)) {
        return Err(CairnError::Config(format!(
            "Collection name '{}' contains forbidden character {:?}",
            name, c
        )));
    }
    Ok(())
}

/// Database/collection selection applied by dump and restore.
///
/// `collection` without `db` is rejected by [`NamespaceFilter::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceFilter {
    pub db: Option<String>,
    pub collection: Option<String>,
}

impl NamespaceFilter {
    pub fn new(db: Option<String>, collection: Option<String>) -> Result<Self> {
        if collection.is_some() && db.is_none() {
            return Err(CairnError::Config(
                "A collection filter requires a database filter".into(),
            ));
        }
        if let Some(ref db) = db {
            validate_db_name(db)?;
        }
        if let Some(ref collection) = collection {
            validate_collection_name(collection)?;
        }
        Ok(Self { db, collection })
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes_db(&self, db: &str) -> bool {
        self.db.as_deref().map_or(true, |want| want == db)
    }

    pub fn includes(&self, ns: &Namespace) -> bool {
        self.includes_db(&ns.db)
            && self
                .collection
                .as_deref()
                .map_or(true, |want| want == ns.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_dot() {
        let ns = Namespace::parse("shop.orders.archive").unwrap();
        assert_eq!(ns.db, "shop");
        assert_eq!(ns.collection, "orders.archive");
        assert_eq!(ns.to_string(), "shop.orders.archive");
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(Namespace::new("", "c").is_err());
        assert!(Namespace::new("a.b", "c").is_err());
        assert!(Namespace::new("db", "a$b").is_err());
        assert!(Namespace::new("db", "../escape").is_err());
        assert!(Namespace::parse("nodot").is_err());
    }

    #[test]
    fn test_filter() {
        assert!(NamespaceFilter::new(None, Some("c".into())).is_err());

        let filter = NamespaceFilter::new(Some("shop".into()), None).unwrap();
        assert!(filter.includes(&Namespace::new("shop", "orders").unwrap()));
        assert!(!filter.includes(&Namespace::new("blog", "posts").unwrap()));

        let filter = NamespaceFilter::new(Some("shop".into()), Some("orders".into())).unwrap();
        assert!(filter.includes(&Namespace::new("shop", "orders").unwrap()));
        assert!(!filter.includes(&Namespace::new("shop", "users").unwrap()));
        assert!(NamespaceFilter::all().includes(&Namespace::new("x", "y").unwrap()));
    }
}
