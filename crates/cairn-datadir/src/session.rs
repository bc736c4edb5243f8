use crate::sql::{self, storage_err};
use crate::store::Shared;
use cairn_core::{
    error::{CairnError, Result},
    types::{
        apply_update, id_key, ApplyOutcome, CollectionMetadata, Document, IndexKey, IndexSpec,
        LogicalTs, Namespace, OpKind, OplogRecord, ID_INDEX_NAME,
    },
    InsertOutcome, ScanControl, StoreSession,
};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One worker's view of a data directory: a lazily opened SQLite
/// connection per database.
pub struct DataDirSession {
    shared: Arc<Shared>,
    conns: HashMap<String, Connection>,
}

impl DataDirSession {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            conns: HashMap::new(),
        }
    }

    /// Connection for `db`. Returns `None` when the database does not exist
    /// and `create` is false.
    fn db(&mut self, db: &str, create: bool) -> Result<Option<&mut Connection>> {
        if !self.conns.contains_key(db) {
            let path = self.shared.layout.db_path(&self.shared.root, db);
            if !path.exists() {
                if !create {
                    return Ok(None);
                }
                if self.shared.config.read_only {
                    return Err(CairnError::InvalidState(format!(
                        "cannot create database {} in a read-only data directory",
                        db
                    )));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = self.connect(&path)?;
            self.conns.insert(db.to_string(), conn);
        }
        Ok(self.conns.get_mut(db))
    }

    fn connect(&self, path: &std::path::Path) -> Result<Connection> {
        let config = &self.shared.config;
        let flags = if config.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(path, flags).map_err(storage_err)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(storage_err)?;

        if !config.read_only {
            let (journal_mode, synchronous) = if config.journal {
                ("WAL", "FULL")
            } else {
                ("MEMORY", "OFF")
            };
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))
                .map_err(|e| CairnError::Config(e.to_string()))?;
            if !mode.eq_ignore_ascii_case(journal_mode) {
                tracing::warn!(
                    "{}: journal mode is {} (wanted {})",
                    path.display(),
                    mode,
                    journal_mode
                );
            }
            conn.pragma_update(None, "synchronous", synchronous)
                .map_err(|e| CairnError::Config(e.to_string()))?;
            conn.execute_batch(sql::CATALOG_DDL).map_err(storage_err)?;
        }

        tracing::debug!("Opened {}", path.display());
        Ok(conn)
    }

    /// Collection table for writes, creating the database and collection
    /// as needed.
    fn writable(&mut self, ns: &Namespace) -> Result<&mut Connection> {
        self.create_collection(ns, &Map::new())?;
        self.db(&ns.db, true)?
            .ok_or_else(|| CairnError::InvalidState(format!("database {} vanished", ns.db)))
    }

    /// Current document with `_id` equal to `id`, if the collection and
    /// document exist.
    pub fn find_by_id(&mut self, ns: &Namespace, id: &Value) -> Result<Option<Document>> {
        let Some(conn) = self.db(&ns.db, false)? else {
            return Ok(None);
        };
        if !sql::table_exists(conn, &ns.collection)? {
            return Ok(None);
        }
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", sql::table(&ns.collection)),
                [id_key(id)],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        body.map(|b| Document::from_slice(b.as_bytes())).transpose()
    }

    fn replay_insert(&mut self, ns: &Namespace, record: &OplogRecord) -> Result<ApplyOutcome> {
        let doc = match Document::from_value(record.o.clone()) {
            Ok(doc) => doc,
            Err(e) => return Ok(ApplyOutcome::Skipped(e.to_string())),
        };
        let body = String::from_utf8(doc.to_vec()?)
            .map_err(|e| CairnError::Serialization(e.to_string()))?;
        let conn = self.writable(ns)?;
        let result = conn.execute(
            &format!(
                "INSERT INTO {} (id, body) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body",
                sql::table(&ns.collection)
            ),
            [doc.id_key(), body],
        );
        match result {
            Ok(_) => Ok(ApplyOutcome::Applied),
            Err(e) if sql::is_constraint_violation(&e) => Ok(ApplyOutcome::Skipped(e.to_string())),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn replay_update(&mut self, ns: &Namespace, record: &OplogRecord) -> Result<ApplyOutcome> {
        let Some(id) = record.target_id().cloned() else {
            return Ok(ApplyOutcome::Skipped("update without _id".into()));
        };
        let unpinned = record.unpinned_increments();
        if !unpinned.is_empty() {
            return Ok(ApplyOutcome::Skipped(format!(
                "$inc on {} is not pinned by the selector and cannot be replayed",
                unpinned.join(", ")
            )));
        }
        let Some(current) = self.find_by_id(ns, &id)? else {
            return Ok(ApplyOutcome::Skipped(format!("no document with _id {}", id)));
        };
        if !record.precondition_holds(&current)? {
            return Ok(ApplyOutcome::Skipped(format!(
                "document {} no longer matches the update selector",
                id
            )));
        }
        let updated = match apply_update(&current, &record.o) {
            Ok(doc) => doc,
            Err(e) => return Ok(ApplyOutcome::Skipped(e.to_string())),
        };
        let body = String::from_utf8(updated.to_vec()?)
            .map_err(|e| CairnError::Serialization(e.to_string()))?;
        let conn = self.writable(ns)?;
        let result = conn.execute(
            &format!("UPDATE {} SET body = ?1 WHERE id = ?2", sql::table(&ns.collection)),
            [body, id_key(&id)],
        );
        match result {
            Ok(_) => Ok(ApplyOutcome::Applied),
            Err(e) if sql::is_constraint_violation(&e) => Ok(ApplyOutcome::Skipped(e.to_string())),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn replay_delete(&mut self, ns: &Namespace, record: &OplogRecord) -> Result<ApplyOutcome> {
        let Some(id) = record.target_id().cloned() else {
            return Ok(ApplyOutcome::Skipped("delete without _id".into()));
        };
        let Some(current) = self.find_by_id(ns, &id)? else {
            return Ok(ApplyOutcome::Skipped(format!("no document with _id {}", id)));
        };
        if !record.precondition_holds(&current)? {
            return Ok(ApplyOutcome::Skipped(format!(
                "document {} no longer matches the delete selector",
                id
            )));
        }
        let conn = self.writable(ns)?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", sql::table(&ns.collection)),
            [id_key(&id)],
        )
        .map_err(storage_err)?;
        Ok(ApplyOutcome::Applied)
    }
}

impl StoreSession for DataDirSession {
    fn list_databases(&mut self) -> Result<Vec<String>> {
        self.shared.layout.list_databases(&self.shared.root)
    }

    fn list_collections(&mut self, db: &str) -> Result<Vec<String>> {
        let Some(conn) = self.db(db, false)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn
            .prepare("SELECT name FROM _cairn_collections ORDER BY name")
            .map_err(storage_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(names)
    }

    fn collection_metadata(&mut self, ns: &Namespace) -> Result<CollectionMetadata> {
        let conn = self
            .db(&ns.db, false)?
            .ok_or_else(|| CairnError::Storage(format!("no database {}", ns.db)))?;

        let options: Option<String> = conn
            .query_row(
                "SELECT options FROM _cairn_collections WHERE name = ?1",
                [&ns.collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let options = options.ok_or_else(|| CairnError::Storage(format!("no collection {}", ns)))?;
        let options: Map<String, Value> = serde_json::from_str(&options)?;

        let mut meta = CollectionMetadata::new(ns.db.clone(), ns.collection.clone());
        meta.options = options;
        meta.indexes.push(IndexSpec::new(
            ID_INDEX_NAME,
            vec![IndexKey::ascending("_id")],
        ));

        let mut stmt = conn
            .prepare("SELECT spec FROM _cairn_indexes WHERE collection = ?1 ORDER BY rowid")
            .map_err(storage_err)?;
        let specs = stmt
            .query_map([&ns.collection], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        for spec in specs {
            let spec = spec.map_err(storage_err)?;
            meta.indexes.push(serde_json::from_str(&spec)?);
        }
        Ok(meta)
    }

    fn scan(
        &mut self,
        ns: &Namespace,
        visit: &mut dyn FnMut(Document) -> Result<ScanControl>,
    ) -> Result<u64> {
        let Some(conn) = self.db(&ns.db, false)? else {
            return Ok(0);
        };
        if !sql::table_exists(conn, &ns.collection)? {
            return Ok(0);
        }
        let mut stmt = conn
            .prepare(&format!(
                "SELECT body FROM {} ORDER BY seq",
                sql::table(&ns.collection)
            ))
            .map_err(storage_err)?;
        let mut rows = stmt.query([]).map_err(storage_err)?;

        let mut count = 0u64;
        while let Some(row) = rows.next().map_err(storage_err)? {
            let body: String = row.get(0).map_err(storage_err)?;
            let doc = Document::from_slice(body.as_bytes()).map_err(|e| {
                CairnError::Storage(format!("corrupt document in {}: {}", ns, e))
            })?;
            count += 1;
            if visit(doc)? == ScanControl::Stop {
                break;
            }
        }
        Ok(count)
    }

    fn create_collection(&mut self, ns: &Namespace, options: &Map<String, Value>) -> Result<()> {
        let options = serde_json::to_string(options)?;
        let conn = self
            .db(&ns.db, true)?
            .ok_or_else(|| CairnError::InvalidState(format!("database {} vanished", ns.db)))?;
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute(
            "INSERT OR IGNORE INTO _cairn_collections (name, options) VALUES (?1, ?2)",
            [&ns.collection, &options],
        )
        .map_err(storage_err)?;
        tx.execute(&sql::create_table(&ns.collection), [])
            .map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    fn drop_collection(&mut self, ns: &Namespace) -> Result<bool> {
        let Some(conn) = self.db(&ns.db, false)? else {
            return Ok(false);
        };
        let tx = conn.transaction().map_err(storage_err)?;
        let index_names = {
            let mut stmt = tx
                .prepare("SELECT name FROM _cairn_indexes WHERE collection = ?1")
                .map_err(storage_err)?;
            let names = stmt
                .query_map([&ns.collection], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            names
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err)?
        };
        for name in &index_names {
            tx.execute(&sql::drop_index(&ns.collection, name), [])
                .map_err(storage_err)?;
        }
        tx.execute(
            "DELETE FROM _cairn_indexes WHERE collection = ?1",
            [&ns.collection],
        )
        .map_err(storage_err)?;
        let existed = tx
            .execute(
                "DELETE FROM _cairn_collections WHERE name = ?1",
                [&ns.collection],
            )
            .map_err(storage_err)?
            > 0;
        tx.execute(
            &format!("DROP TABLE IF EXISTS {}", sql::table(&ns.collection)),
            [],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        if existed {
            tracing::debug!("Dropped {}", ns);
        }
        Ok(existed)
    }

    fn insert_many(&mut self, ns: &Namespace, docs: &[Document]) -> Result<Vec<InsertOutcome>> {
        let conn = self.writable(ns)?;
        let tx = conn.transaction().map_err(storage_err)?;
        let mut outcomes = Vec::with_capacity(docs.len());
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (id, body) VALUES (?1, ?2)",
                    sql::table(&ns.collection)
                ))
                .map_err(storage_err)?;
            for doc in docs {
                let body = serde_json::to_string(doc.as_map())?;
                match stmt.execute([doc.id_key(), body]) {
                    Ok(_) => outcomes.push(InsertOutcome::Inserted),
                    Err(e) if sql::is_constraint_violation(&e) => {
                        outcomes.push(InsertOutcome::Failed(format!(
                            "duplicate key for _id {}: {}",
                            doc.id(),
                            e
                        )))
                    }
                    Err(e) => return Err(storage_err(e)),
                }
            }
        }
        tx.commit().map_err(storage_err)?;
        Ok(outcomes)
    }

    fn create_index(&mut self, ns: &Namespace, index: &IndexSpec) -> Result<()> {
        index.validate()?;
        let spec = serde_json::to_string(index)?;
        let conn = self.writable(ns)?;
        let tx = conn.transaction().map_err(storage_err)?;
        if let Some(ddl) = sql::create_index(&ns.collection, index) {
            tx.execute(&ddl, []).map_err(|e| {
                CairnError::Storage(format!("building index {} on {}: {}", index.name, ns, e))
            })?;
        } else {
            tracing::debug!(
                "Index {} on {} has no ordered keys, recording definition only",
                index.name,
                ns
            );
        }
        tx.execute(
            "INSERT OR REPLACE INTO _cairn_indexes (collection, name, spec) VALUES (?1, ?2, ?3)",
            [&ns.collection, &index.name, &spec],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    fn apply_op(&mut self, record: &OplogRecord) -> Result<ApplyOutcome> {
        let ns = record.namespace()?;
        match record.op {
            OpKind::Noop => Ok(ApplyOutcome::Applied),
            OpKind::Insert => self.replay_insert(&ns, record),
            OpKind::Update => self.replay_update(&ns, record),
            OpKind::Delete => self.replay_delete(&ns, record),
        }
    }

    fn oplog_head(&mut self) -> Result<Option<LogicalTs>> {
        Ok(None)
    }

    fn oplog_since(
        &mut self,
        _after: LogicalTs,
        _visit: &mut dyn FnMut(OplogRecord) -> Result<()>,
    ) -> Result<u64> {
        Err(CairnError::Config(
            "a data directory has no operation log to capture".into(),
        ))
    }
}
