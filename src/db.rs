// 🗄️ Backing Store Adapter - SQLite via rusqlite
//
// Parameterized select-by-key, select-by-predicate, insert-returning-key and
// update-by-key, all driven by schema descriptors. Also owns the join/link
// table statements and the transaction boundary primitives.

use crate::error::{RecordError, Result};
use crate::schema::{EntitySchema, LinkSchema, SchemaRegistry, TagJoinSchema};
use crate::value::{Key, RowReader, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// One stored link row, endpoints in canonical ascending order
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRow {
    pub id: Key,
    pub left: Key,
    pub right: Key,
    pub category: Option<String>,
    pub report: Key,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open a database file (creates if it doesn't exist), WAL mode for crash recovery
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Store { conn })
    }

    /// In-memory database (for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Store {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Store { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create every registered table and index (idempotent)
    pub fn setup_database(&self, registry: &SchemaRegistry) -> Result<()> {
        for statement in registry.create_statements()? {
            self.conn.execute(&statement, [])?;
        }
        Ok(())
    }

    // ========================================================================
    // TRANSACTION BOUNDARY
    // ========================================================================

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    // ========================================================================
    // ENTITY ROWS
    // ========================================================================

    pub fn select_by_key(&self, schema: &'static EntitySchema, key: Key) -> Result<Option<RowReader>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            schema.select_list(),
            schema.table,
            schema.primary_key
        );
        let width = column_count(schema);
        let raw = self
            .conn
            .query_row(&sql, [key], |row| read_raw(row, width))
            .optional()?;
        raw.map(|raw| decode_row(schema, raw)).transpose()
    }

    /// Rows matching every `(column, value)` pair; NULL compares equal to NULL
    pub fn select_where(
        &self,
        schema: &'static EntitySchema,
        filters: &[(&'static str, Value)],
    ) -> Result<Vec<RowReader>> {
        let mut sql = format!("SELECT {} FROM {}", schema.select_list(), schema.table);
        if !filters.is_empty() {
            let clauses: Vec<String> = filters
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} IS ?{}", column, i + 1))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {}", schema.primary_key));

        let width = column_count(schema);
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(filters.iter().map(|(_, v)| v)), |row| {
                read_raw(row, width)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raws.into_iter().map(|raw| decode_row(schema, raw)).collect()
    }

    /// Insert content values (schema order) plus owning report; returns the new key
    pub fn insert(
        &self,
        schema: &'static EntitySchema,
        values: &[Value],
        report: Option<Key>,
    ) -> Result<Key> {
        let mut columns: Vec<&str> = schema.fields.iter().map(|f| f.column).collect();
        let mut bound: Vec<Value> = values.to_vec();
        if let Some(report_column) = schema.report_column {
            let report = report.ok_or_else(|| {
                RecordError::AssociationPrecondition(format!(
                    "{} rows require an owning report",
                    schema.kind
                ))
            })?;
            columns.push(report_column);
            bound.push(Value::Integer(report));
        }

        let placeholders: Vec<String> = (1..=bound.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(bound.iter()))?;
        let key = self.conn.last_insert_rowid();
        debug!(table = schema.table, key, "inserted row");
        Ok(key)
    }

    /// Full-row update; false when no row carries `key`
    pub fn update(
        &self,
        schema: &'static EntitySchema,
        key: Key,
        values: &[Value],
        report: Option<Key>,
    ) -> Result<bool> {
        let mut assignments: Vec<String> = schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{} = ?{}", f.column, i + 1))
            .collect();
        let mut bound: Vec<Value> = values.to_vec();
        if let (Some(report_column), Some(report)) = (schema.report_column, report) {
            bound.push(Value::Integer(report));
            assignments.push(format!("{} = ?{}", report_column, bound.len()));
        }
        bound.push(Value::Integer(key));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            schema.table,
            assignments.join(", "),
            schema.primary_key,
            bound.len()
        );
        let changed = self.conn.execute(&sql, params_from_iter(bound.iter()))?;
        Ok(changed > 0)
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // TAG JOIN ROWS
    // ========================================================================

    pub fn select_tag_keys(&self, join: &'static TagJoinSchema, entity: Key) -> Result<Vec<Key>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            join.tag_column, join.table, join.entity_column, join.tag_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let keys = stmt
            .query_map([entity], |row| row.get(0))?
            .collect::<std::result::Result<Vec<Key>, _>>()?;
        Ok(keys)
    }

    /// Insert a join row unless one exists; true when a row was added
    pub fn insert_tag(
        &self,
        join: &'static TagJoinSchema,
        entity: Key,
        tag: Key,
        report: Key,
    ) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
            join.table, join.entity_column, join.tag_column, join.report_column
        );
        let changed = self.conn.execute(&sql, params![entity, tag, report])?;
        Ok(changed > 0)
    }

    // ========================================================================
    // LINK ROWS
    // ========================================================================

    /// Link rows touching `key`, optionally restricted to one category
    pub fn select_links(
        &self,
        link: &'static LinkSchema,
        key: Key,
        category: Option<&str>,
    ) -> Result<Vec<LinkRow>> {
        let mut sql = format!(
            "SELECT id, {left}, {right}, {cat}, {report} FROM {table} WHERE ({left} = ?1 OR {right} = ?1)",
            left = link.left,
            right = link.right,
            cat = link.category,
            report = link.report_column,
            table = link.table,
        );
        if category.is_some() {
            sql.push_str(&format!(" AND {} = ?2", link.category));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(LinkRow {
                id: row.get(0)?,
                left: row.get(1)?,
                right: row.get(2)?,
                category: row.get(3)?,
                report: row.get(4)?,
            })
        };
        let rows = match category {
            Some(category) => stmt
                .query_map(params![key, category], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![key], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Store a link with endpoints in ascending order; returns the stored row
    pub fn insert_link(
        &self,
        link: &'static LinkSchema,
        a: Key,
        b: Key,
        category: Option<&str>,
        report: Key,
    ) -> Result<LinkRow> {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4)",
            link.table, link.left, link.right, link.category, link.report_column
        );
        self.conn.execute(&sql, params![left, right, category, report])?;
        Ok(LinkRow {
            id: self.conn.last_insert_rowid(),
            left,
            right,
            category: category.map(str::to_string),
            report,
        })
    }
}

fn column_count(schema: &EntitySchema) -> usize {
    1 + schema.fields.len() + usize::from(schema.report_column.is_some())
}

fn read_raw(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<SqlValue>> {
    (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
}

fn decode_row(schema: &'static EntitySchema, raw: Vec<SqlValue>) -> Result<RowReader> {
    let entity = schema.kind.name();
    let mut raw = raw.into_iter();

    let key = match raw.next() {
        Some(SqlValue::Integer(key)) => key,
        other => {
            return Err(RecordError::invalid(
                entity,
                format!("primary key is not an integer: {:?}", other),
            ))
        }
    };

    let mut values = HashMap::new();
    for field in schema.fields {
        let cell = raw.next().unwrap_or(SqlValue::Null);
        values.insert(field.name, Value::from_sql(entity, field.kind, cell)?);
    }

    let report = match (schema.report_column, raw.next()) {
        (Some(_), Some(SqlValue::Integer(report))) => Some(report),
        (Some(_), other) => {
            return Err(RecordError::invalid(
                entity,
                format!("owning report is not a key: {:?}", other),
            ))
        }
        (None, _) => None,
    };

    Ok(RowReader::new(entity, key, report, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ASSETS, REPORTS, TRANSACTION_LINKS, TRANSACTION_TAGS};
    use chrono::Utc;

    fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .setup_database(&SchemaRegistry::standard().unwrap())
            .unwrap();
        store
    }

    fn insert_report(store: &Store) -> Key {
        store
            .insert(
                &REPORTS,
                &[
                    Value::from("test"),
                    Value::Null,
                    Value::Null,
                    Value::from(Utc::now()),
                ],
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_insert_and_select_by_key() {
        let store = test_store();
        let report = insert_report(&store);
        let key = store
            .insert(
                &ASSETS,
                &[Value::from("usd"), Value::from("currency"), Value::Null],
                Some(report),
            )
            .unwrap();

        let row = store.select_by_key(&ASSETS, key).unwrap().unwrap();
        assert_eq!(row.key(), key);
        assert_eq!(row.report(), Some(report));
        assert_eq!(row.text("name").unwrap().as_deref(), Some("usd"));
        assert!(store.select_by_key(&ASSETS, key + 100).unwrap().is_none());
    }

    #[test]
    fn test_owned_insert_requires_report() {
        let store = test_store();
        let result = store.insert(
            &ASSETS,
            &[Value::from("usd"), Value::from("currency"), Value::Null],
            None,
        );
        assert!(matches!(result, Err(RecordError::AssociationPrecondition(_))));
    }

    #[test]
    fn test_select_where_matches_null() {
        let store = test_store();
        let report = insert_report(&store);
        for (name, description) in [("usd", None), ("eur", Some("euro"))] {
            store
                .insert(
                    &ASSETS,
                    &[Value::from(name), Value::from("currency"), Value::from(description)],
                    Some(report),
                )
                .unwrap();
        }

        let rows = store
            .select_where(&ASSETS, &[("description", Value::Null)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("name").unwrap().as_deref(), Some("usd"));

        let all = store.select_where(&ASSETS, &[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_update_missing_row() {
        let store = test_store();
        let report = insert_report(&store);
        let changed = store
            .update(
                &ASSETS,
                999,
                &[Value::from("usd"), Value::from("currency"), Value::Null],
                Some(report),
            )
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_tag_rows_ignore_duplicates() {
        let store = test_store();
        let report = insert_report(&store);
        assert!(store.insert_tag(&TRANSACTION_TAGS, 1, 2, report).unwrap());
        assert!(!store.insert_tag(&TRANSACTION_TAGS, 1, 2, report).unwrap());
        assert_eq!(store.select_tag_keys(&TRANSACTION_TAGS, 1).unwrap(), vec![2]);
    }

    #[test]
    fn test_link_rows_are_canonical() {
        let store = test_store();
        let report = insert_report(&store);
        let row = store
            .insert_link(&TRANSACTION_LINKS, 9, 4, Some("transfer"), report)
            .unwrap();
        assert_eq!((row.left, row.right), (4, 9));

        assert_eq!(store.select_links(&TRANSACTION_LINKS, 9, None).unwrap().len(), 1);
        assert_eq!(
            store
                .select_links(&TRANSACTION_LINKS, 4, Some("transfer"))
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .select_links(&TRANSACTION_LINKS, 4, Some("fee"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transaction_rollback() {
        let store = test_store();
        store.begin().unwrap();
        assert!(store.in_transaction());
        insert_report(&store);
        store.rollback().unwrap();
        assert_eq!(store.count("reports").unwrap(), 0);
    }
}
