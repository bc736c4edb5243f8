//! SQL text for the per-database catalog and collection tables.

use cairn_core::error::{CairnError, Result};
use cairn_core::types::{IndexSpec, KeyOrder};
use rusqlite::Connection;

pub const CATALOG_DDL: &str = "
    CREATE TABLE IF NOT EXISTS _cairn_collections (
        name TEXT PRIMARY KEY,
        options TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE TABLE IF NOT EXISTS _cairn_indexes (
        collection TEXT NOT NULL,
        name TEXT NOT NULL,
        spec TEXT NOT NULL,
        PRIMARY KEY (collection, name)
    );";

/// Quote an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Table holding a collection's documents.
pub fn table(collection: &str) -> String {
    quote_ident(&format!("c.{}", collection))
}

fn index_ident(collection: &str, index: &str) -> String {
    quote_ident(&format!("i.{}.{}", collection, index))
}

pub fn create_table(collection: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL
        )",
        table(collection)
    )
}

/// JSON path for a dotted field name, with each segment quoted.
///
/// The path grammar has no escape for `"`; [`IndexSpec::validate`] rejects
/// such field names before they get here.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(&format!(".\"{}\"", segment));
    }
    path
}

/// `CREATE INDEX` for an ordered index, or `None` for special kinds that are
/// only recorded in the catalog.
pub fn create_index(collection: &str, index: &IndexSpec) -> Option<String> {
    let mut columns = Vec::with_capacity(index.key.len());
    for key in &index.key {
        let direction = match key.order()? {
            KeyOrder::Ascending => "ASC",
            KeyOrder::Descending => "DESC",
        };
        columns.push(format!(
            "json_extract(body, {}) {}",
            quote_literal(&json_path(&key.field)),
            direction
        ));
    }
    Some(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index_ident(collection, &index.name),
        table(collection),
        columns.join(", ")
    ))
}

pub fn drop_index(collection: &str, index: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", index_ident(collection, index))
}

/// Whether a table for `collection` exists.
pub fn table_exists(conn: &Connection, collection: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [format!("c.{}", collection)],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(storage_err)
}

pub fn storage_err(e: rusqlite::Error) -> CairnError {
    CairnError::Storage(e.to_string())
}

/// True for UNIQUE / PRIMARY KEY violations.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
