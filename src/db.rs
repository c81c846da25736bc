use chrono::SecondsFormat;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::CanonicalJobListing;
use crate::store::{ensure_conflict_key, ListingStore};

const TABLE: &str = "job_listings";

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobsweep") {
            proj_dirs.data_dir().join("jobsweep.db")
        } else {
            PathBuf::from("jobsweep.db")
        }
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let columns: Vec<String> = CanonicalJobListing::COLUMNS
            .iter()
            .map(|column| format!("{} {}", column, column_type(column)))
            .chain(std::iter::once("extra TEXT".to_string()))
            .collect();

        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                {}
            );

            CREATE INDEX IF NOT EXISTS idx_job_listings_site ON {TABLE}(site);
            CREATE INDEX IF NOT EXISTS idx_job_listings_scraped_at ON {TABLE}(scraped_at);
            "#,
            columns.join(",\n                ")
        ))?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [TABLE],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(StoreError::NotInitialized(format!(
                "{} has no {} table. Run 'jobsweep init' first.",
                self.path.display(),
                TABLE
            )));
        }
        Ok(())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Result<Option<CanonicalJobListing>, StoreError> {
        let sql = format!("SELECT {} FROM {TABLE} WHERE id = ?1", select_list());
        let row = self
            .conn
            .query_row(&sql, [id], read_row)
            .optional()?;
        row.map(row_to_listing).transpose()
    }

    /// Most recently scraped listings first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<CanonicalJobListing>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {TABLE} ORDER BY scraped_at DESC, id LIMIT ?1",
            select_list()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(row_to_listing).collect()
    }

    fn upsert_sql() -> String {
        let columns = select_list();
        let placeholders: Vec<String> = (1..=CanonicalJobListing::COLUMNS.len() + 1)
            .map(|i| format!("?{}", i))
            .collect();
        let updates: Vec<String> = CanonicalJobListing::COLUMNS
            .iter()
            .copied()
            .chain(std::iter::once("extra"))
            .filter(|column| *column != "id")
            .map(|column| format!("{column} = excluded.{column}"))
            .collect();

        format!(
            "INSERT INTO {TABLE} ({columns}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            placeholders.join(", "),
            updates.join(", ")
        )
    }
}

impl ListingStore for SqliteStore {
    fn probe(&self) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        self.conn
            .query_row(&format!("SELECT id FROM {TABLE} LIMIT 1"), [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(())
    }

    fn upsert(&self, listings: &[CanonicalJobListing], conflict_key: &str) -> Result<usize, StoreError> {
        ensure_conflict_key(conflict_key)?;

        // One transaction per batch: the batch lands whole or not at all
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&Self::upsert_sql())?;
            for listing in listings {
                stmt.execute(params_from_iter(listing_to_row(listing)?))?;
            }
        }
        tx.commit()?;
        Ok(listings.len())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

fn column_type(column: &str) -> &'static str {
    match column {
        "id" => "TEXT PRIMARY KEY",
        "company_rating" => "REAL",
        "scraped_at" => "TEXT NOT NULL",
        c if CanonicalJobListing::COUNT_COLUMNS.contains(&c) => "INTEGER",
        // Lists are stored as JSON arrays
        _ => "TEXT",
    }
}

fn select_list() -> String {
    CanonicalJobListing::COLUMNS
        .iter()
        .copied()
        .chain(std::iter::once("extra"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn listing_to_row(listing: &CanonicalJobListing) -> Result<Vec<SqlValue>, StoreError> {
    // Serialization flattens `extra` into the top level; whatever is left
    // after taking the named columns is the extra map.
    let mut object: Map<String, Value> = serde_json::from_value(serde_json::to_value(listing)?)?;

    let mut row: Vec<SqlValue> = CanonicalJobListing::COLUMNS
        .iter()
        .map(|column| match *column {
            // Fixed width so text order matches time order
            "scraped_at" => {
                object.remove(*column);
                SqlValue::Text(listing.scraped_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
            }
            _ => object.remove(*column).map_or(SqlValue::Null, json_to_sql),
        })
        .collect();

    row.push(if object.is_empty() {
        SqlValue::Null
    } else {
        SqlValue::Text(serde_json::to_string(&object)?)
    });
    Ok(row)
}

fn json_to_sql(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<Vec<SqlValue>> {
    (0..=CanonicalJobListing::COLUMNS.len())
        .map(|i| row.get::<_, SqlValue>(i))
        .collect()
}

fn row_to_listing(row: Vec<SqlValue>) -> Result<CanonicalJobListing, StoreError> {
    let mut values = row.into_iter();
    let mut object = Map::new();

    for column in CanonicalJobListing::COLUMNS {
        let value = match values.next().unwrap_or(SqlValue::Null) {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => Value::from(f),
            SqlValue::Text(s) if CanonicalJobListing::LIST_COLUMNS.contains(&column) => {
                serde_json::from_str(&s)?
            }
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Blob(_) => Value::Null,
        };
        object.insert(column.to_string(), value);
    }

    if let Some(SqlValue::Text(extra)) = values.next() {
        let extra: Map<String, Value> = serde_json::from_str(&extra)?;
        object.extend(extra);
    }

    Ok(serde_json::from_value(Value::Object(object))?)
}
