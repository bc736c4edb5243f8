use cairn_core::error::{CairnError, Result};
use cairn_core::types::namespace::validate_db_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Layout descriptor stored at `<root>/storage.json`.
pub const LAYOUT_FILE: &str = "storage.json";

/// Current data directory format.
pub const STORAGE_FORMAT_VERSION: u32 = 1;

const DB_EXTENSION: &str = "sqlite";
const PER_DB_FILE: &str = "data.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub format_version: u32,
    pub directory_per_db: bool,
}

impl StorageLayout {
    pub fn new(directory_per_db: bool) -> Self {
        Self {
            format_version: STORAGE_FORMAT_VERSION,
            directory_per_db,
        }
    }

    /// Read the layout descriptor, if the directory has one.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(LAYOUT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        let layout: Self = serde_json::from_slice(&data)
            .map_err(|e| CairnError::Storage(format!("Failed to parse {}: {}", LAYOUT_FILE, e)))?;
        if layout.format_version != STORAGE_FORMAT_VERSION {
            return Err(CairnError::Storage(format!(
                "Unsupported data directory format version {}",
                layout.format_version
            )));
        }
        Ok(Some(layout))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(root.join(LAYOUT_FILE), data)?;
        Ok(())
    }

    /// Fail with a configuration error when the directory was created with
    /// a different layout than requested.
    pub fn check(&self, directory_per_db: bool) -> Result<()> {
        if self.directory_per_db != directory_per_db {
            let (found, wanted) = if self.directory_per_db {
                ("per-database directories", "a flat layout")
            } else {
                ("a flat layout", "per-database directories")
            };
            return Err(CairnError::Config(format!(
                "Data directory uses {} but {} was requested (check --directoryperdb)",
                found, wanted
            )));
        }
        Ok(())
    }

    /// SQLite file holding database `db`.
    pub fn db_path(&self, root: &Path, db: &str) -> PathBuf {
        if self.directory_per_db {
            root.join(db).join(PER_DB_FILE)
        } else {
            root.join(format!("{}.{}", db, DB_EXTENSION))
        }
    }

    /// Databases present under `root`, sorted by name.
    pub fn list_databases(&self, root: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            let name = if self.directory_per_db {
                if !path.join(PER_DB_FILE).is_file() {
                    continue;
                }
                entry.file_name().to_string_lossy().into_owned()
            } else {
                if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
                    continue;
                }
                match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem.to_string(),
                    None => continue,
                }
            };
            if validate_db_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_paths() {
        let root = Path::new("/data");
        assert_eq!(
            StorageLayout::new(false).db_path(root, "shop"),
            PathBuf::from("/data/shop.sqlite")
        );
        assert_eq!(
            StorageLayout::new(true).db_path(root, "shop"),
            PathBuf::from("/data/shop/data.sqlite")
        );
    }

    #[test]
    fn test_layout_mismatch_is_config_error() {
        let err = StorageLayout::new(true).check(false).unwrap_err();
        assert!(matches!(err, CairnError::Config(_)));
        assert!(StorageLayout::new(false).check(false).is_ok());
    }

    #[test]
    fn test_list_databases() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.sqlite"), b"").unwrap();
        std::fs::write(dir.path().join("a.sqlite"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(dir.path().join("cairn.lock"), b"").unwrap();
        let flat = StorageLayout::new(false);
        assert_eq!(flat.list_databases(dir.path()).unwrap(), vec!["a", "b"]);

        std::fs::create_dir(dir.path().join("c")).unwrap();
        std::fs::write(dir.path().join("c").join("data.sqlite"), b"").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let nested = StorageLayout::new(true);
        assert_eq!(nested.list_databases(dir.path()).unwrap(), vec!["c"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        assert_eq!(StorageLayout::load(dir.path()).unwrap(), None);
        StorageLayout::new(true).save(dir.path()).unwrap();
        assert_eq!(
            StorageLayout::load(dir.path()).unwrap(),
            Some(StorageLayout::new(true))
        );
    }
}
