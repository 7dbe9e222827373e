//! SQLite metric store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Result as SqlResult, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Refs per statement when aggregating, kept well under SQLite's bound
/// on host parameters.
const AGGREGATE_CHUNK: usize = 500;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const COLUMNS: &str =
    "id, catalog_entity_ref, metric_id, value, timestamp, error_message, status, entity_kind, entity_owner";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database mutex poisoned")]
    Poisoned,
}

/// Thread-safe metric store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given path and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let mut conn = Connection::open(path)?;
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Insert metric values in one transaction. Returns rows written.
    pub fn append(&self, values: &[MetricValueRecord]) -> Result<usize, DbError> {
        if values.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO metric_values (catalog_entity_ref, metric_id, value, timestamp, error_message, status, entity_kind, entity_owner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for v in values {
                stmt.execute(params![
                    v.entity_ref,
                    v.metric_id,
                    v.value,
                    format_db_time(&v.timestamp),
                    v.error_message,
                    v.status.map(|s| s.as_str()),
                    v.entity_kind,
                    v.entity_owner,
                ])?;
            }
        }

        tx.commit()?;
        Ok(values.len())
    }

    /// Latest row per requested metric for one entity. Metrics without any
    /// rows are absent from the result.
    pub fn latest_for(&self, entity_ref: &str, metric_ids: &[String]) -> Result<Vec<MetricValueRecord>, DbError> {
        if metric_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (PARTITION BY metric_id ORDER BY timestamp DESC, id DESC) AS rn
                FROM metric_values
                WHERE catalog_entity_ref = ? AND metric_id IN ({})
             ) WHERE rn = 1 ORDER BY metric_id",
            placeholders(metric_ids.len())
        );

        let mut args: Vec<Value> = vec![Value::Text(entity_ref.to_string())];
        args.extend(metric_ids.iter().map(|id| Value::Text(id.clone())));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), row_to_record)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Status counts over the latest row of each entity in `entity_refs`.
    pub fn aggregate(&self, entity_refs: &[String], metric_id: &str) -> Result<AggregatedCounts, DbError> {
        if entity_refs.is_empty() {
            return Ok(AggregatedCounts::default());
        }

        // Chunks must not share refs or an entity would count twice.
        let unique: Vec<&String> = entity_refs.iter().collect::<BTreeSet<_>>().into_iter().collect();

        let conn = self.lock()?;
        let mut parts = Vec::new();
        for chunk in unique.chunks(AGGREGATE_CHUNK) {
            let sql = format!(
                "WITH latest AS (
                    SELECT status, timestamp,
                           ROW_NUMBER() OVER (PARTITION BY catalog_entity_ref ORDER BY timestamp DESC, id DESC) AS rn
                    FROM metric_values
                    WHERE metric_id = ? AND catalog_entity_ref IN ({})
                 )
                 SELECT COUNT(*),
                        COALESCE(SUM(status = 'success'), 0),
                        COALESCE(SUM(status = 'warning'), 0),
                        COALESCE(SUM(status = 'error'), 0),
                        MAX(timestamp)
                 FROM latest WHERE rn = 1",
                placeholders(chunk.len())
            );

            let mut args: Vec<Value> = vec![Value::Text(metric_id.to_string())];
            args.extend(chunk.iter().map(|r| Value::Text((*r).clone())));

            let part = conn.query_row(&sql, params_from_iter(args), |row| {
                let max_time: Option<String> = row.get(4)?;
                Ok(AggregatedCounts {
                    total: row.get(0)?,
                    success: row.get(1)?,
                    warning: row.get(2)?,
                    error: row.get(3)?,
                    max_timestamp: max_time.as_deref().and_then(parse_db_time),
                })
            })?;
            parts.push(part);
        }

        Ok(AggregatedCounts::merge_all(parts))
    }

    /// Filtered, sorted, paginated latest rows for one metric.
    ///
    /// Filters apply to the latest row of each entity only, and counting,
    /// sorting and paging all run against that same set.
    pub fn query_details(
        &self,
        metric_id: &str,
        filters: &DetailFilters,
        sort: DetailSort,
        pagination: Pagination,
    ) -> Result<DetailPage, DbError> {
        let mut scope = String::from("metric_id = ?");
        let mut args: Vec<Value> = vec![Value::Text(metric_id.to_string())];

        if !filters.entity_refs.is_empty() {
            scope.push_str(&format!(" AND catalog_entity_ref IN ({})", placeholders(filters.entity_refs.len())));
            args.extend(filters.entity_refs.iter().map(|r| Value::Text(r.clone())));
        }

        let mut conditions = String::from("rn = 1");
        if let Some(status) = filters.status {
            conditions.push_str(" AND status = ?");
            args.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(kind) = &filters.entity_kind {
            conditions.push_str(" AND LOWER(entity_kind) = ?");
            args.push(Value::Text(kind.to_lowercase()));
        }
        if !filters.entity_owners.is_empty() {
            conditions.push_str(&format!(" AND LOWER(entity_owner) IN ({})", placeholders(filters.entity_owners.len())));
            args.extend(filters.entity_owners.iter().map(|o| Value::Text(o.to_lowercase())));
        }
        if let Some(name) = filters.entity_name.as_deref().filter(|n| !n.is_empty()) {
            conditions.push_str(" AND LOWER(catalog_entity_ref) LIKE ? ESCAPE '\\'");
            args.push(Value::Text(format!("%{}%", escape_like(&name.to_lowercase()))));
        }

        let latest = format!(
            "WITH latest AS (
                SELECT *, ROW_NUMBER() OVER (PARTITION BY catalog_entity_ref ORDER BY timestamp DESC, id DESC) AS rn
                FROM metric_values WHERE {scope}
             )"
        );

        let conn = self.lock()?;

        let count_sql = format!("{latest} SELECT COUNT(*) FROM latest WHERE {conditions}");
        let total: i64 = conn.query_row(&count_sql, params_from_iter(args.iter()), |row| row.get(0))?;

        // Each entity has exactly one latest row, so the ref tie-break makes
        // the order total and pages disjoint.
        let column = sort.field.column();
        let page_sql = format!(
            "{latest} SELECT {COLUMNS} FROM latest WHERE {conditions}
             ORDER BY {column} IS NULL, {column} {dir}, catalog_entity_ref ASC
             LIMIT ? OFFSET ?",
            dir = sort.order.keyword()
        );
        args.push(Value::Integer(pagination.page_size as i64));
        args.push(Value::Integer(pagination.offset()));

        let mut stmt = conn.prepare(&page_sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), row_to_record)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(DetailPage { rows, total })
    }

    /// Newest-first history for one entity and metric.
    pub fn history(&self, entity_ref: &str, metric_id: &str, limit: u32) -> Result<Vec<MetricValueRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM metric_values
             WHERE catalog_entity_ref = ?1 AND metric_id = ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![entity_ref, metric_id, limit], row_to_record)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete rows strictly older than the cutoff. Returns rows deleted.
    pub fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM metric_values WHERE timestamp < ?1",
            params![format_db_time(&cutoff)],
        )?;
        Ok(deleted)
    }
}

fn row_to_record(row: &Row<'_>) -> SqlResult<MetricValueRecord> {
    let time_str: String = row.get(4)?;
    let timestamp = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("invalid timestamp '{}'", time_str).into(),
        )
    })?;
    let status: Option<String> = row.get(6)?;

    Ok(MetricValueRecord {
        id: row.get(0)?,
        entity_ref: row.get(1)?,
        metric_id: row.get(2)?,
        value: row.get(3)?,
        timestamp,
        error_message: row.get(5)?,
        status: status.and_then(|s| s.parse().ok()),
        entity_kind: row.get(7)?,
        entity_owner: row.get(8)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Fixed-width UTC text, so lexical order is chronological order.
fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
