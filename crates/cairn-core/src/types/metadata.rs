use crate::error::{CairnError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index format version written by current tooling.
pub const CURRENT_INDEX_VERSION: u32 = 2;

/// Name of the implicit primary-key index.
pub const ID_INDEX_NAME: &str = "_id_";

/// Definition of one secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within its collection
    pub name: String,

    /// Ordered key fields; values are `1`/`-1` for ordered indexes or a
    /// string for special kinds (e.g. `"text"`, `"hashed"`)
    pub key: Vec<IndexKey>,

    #[serde(default)]
    pub unique: bool,

    /// Index format version
    #[serde(default = "default_index_version")]
    pub v: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub kind: Value,
}

fn default_index_version() -> u32 {
    CURRENT_INDEX_VERSION
}

/// Ordering of an index key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Ascending,
    Descending,
}

impl IndexKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: Value::from(1),
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: Value::from(-1),
        }
    }

    /// `Some` for ordered keys, `None` for special index kinds.
    pub fn order(&self) -> Option<KeyOrder> {
        match self.kind.as_f64() {
            Some(d) if d > 0.0 => Some(KeyOrder::Ascending),
            Some(d) if d < 0.0 => Some(KeyOrder::Descending),
            _ => None,
        }
    }
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, key: Vec<IndexKey>) -> Self {
        Self {
            name: name.into(),
            key,
            unique: false,
            v: CURRENT_INDEX_VERSION,
        }
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_version(mut self, v: u32) -> Self {
        self.v = v;
        self
    }

    pub fn is_id_index(&self) -> bool {
        self.name == ID_INDEX_NAME
    }

    /// True when every key field has an ascending/descending order.
    pub fn is_ordered(&self) -> bool {
        self.key.iter().all(|k| k.order().is_some())
    }

    /// Version this index is restored with.
    ///
    /// Older versions are upgraded to [`CURRENT_INDEX_VERSION`] unless the
    /// caller asked to keep them.
    pub fn restored_version(&self, keep_index_version: bool) -> u32 {
        if keep_index_version {
            self.v
        } else {
            self.v.max(CURRENT_INDEX_VERSION)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CairnError::ValidationFailed("index name is empty".into()));
        }
        if self.key.is_empty() {
            return Err(CairnError::ValidationFailed(format!(
                "index '{}' has no key fields",
                self.name
            )));
        }
        if self.key.iter().any(|k| k.field.is_empty()) {
            return Err(CairnError::ValidationFailed(format!(
                "index '{}' has an empty key field",
                self.name
            )));
        }
        if let Some(key) = self.key.iter().find(|k| k.field.contains('"')) {
            return Err(CairnError::ValidationFailed(format!(
                "index '{}' key field {:?} contains a double quote",
                self.name, key.field
            )));
        }
        Ok(())
    }
}

/// Per-collection descriptor stored beside each collection file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub db: String,
    pub collection: String,

    /// Collection creation options, passed through opaquely
    #[serde(default)]
    pub options: Map<String, Value>,

    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl CollectionMetadata {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            options: Map::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Indexes that must be built after load (everything but `_id_`).
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().filter(|ix| !ix.is_id_index())
    }
}
