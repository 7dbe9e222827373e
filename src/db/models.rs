//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Threshold outcome stored alongside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Success,
    Warning,
    Error,
}

impl MetricStatus {
    pub const ALL: [MetricStatus; 3] = [MetricStatus::Success, MetricStatus::Warning, MetricStatus::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Success => "success",
            MetricStatus::Warning => "warning",
            MetricStatus::Error => "error",
        }
    }
}

impl FromStr for MetricStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(MetricStatus::Success),
            "warning" => Ok(MetricStatus::Warning),
            "error" => Ok(MetricStatus::Error),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One computed value for an entity and metric. Rows are append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValueRecord {
    pub id: i64,
    pub entity_ref: String,
    pub metric_id: String,
    /// Booleans are stored as 1.0 / 0.0.
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
    pub status: Option<MetricStatus>,
    /// Denormalized at write time so drill-down filters need no catalog call.
    pub entity_kind: Option<String>,
    pub entity_owner: Option<String>,
}

impl Default for MetricValueRecord {
    fn default() -> Self {
        Self {
            id: 0,
            entity_ref: String::new(),
            metric_id: String::new(),
            value: None,
            timestamp: Utc::now(),
            error_message: None,
            status: None,
            entity_kind: None,
            entity_owner: None,
        }
    }
}

/// Status counts over the latest row of each entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedCounts {
    pub total: i64,
    pub success: i64,
    pub warning: i64,
    pub error: i64,
    pub max_timestamp: Option<DateTime<Utc>>,
}

impl AggregatedCounts {
    fn absorb(&mut self, other: AggregatedCounts) {
        self.total += other.total;
        self.success += other.success;
        self.warning += other.warning;
        self.error += other.error;
        self.max_timestamp = match (self.max_timestamp, other.max_timestamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub(super) fn merge_all(parts: impl IntoIterator<Item = AggregatedCounts>) -> Self {
        let mut total = AggregatedCounts::default();
        for part in parts {
            total.absorb(part);
        }
        total
    }
}

/// Drill-down filters. All present filters must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFilters {
    pub status: Option<MetricStatus>,
    pub entity_kind: Option<String>,
    pub entity_owners: Vec<String>,
    /// Case-insensitive substring of the full entity ref.
    pub entity_name: Option<String>,
    /// Restrict to these refs. Empty means no restriction.
    pub entity_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    EntityName,
    Owner,
    EntityKind,
    Timestamp,
    MetricValue,
}

impl SortField {
    pub(super) fn column(&self) -> &'static str {
        match self {
            SortField::EntityName => "catalog_entity_ref",
            SortField::Owner => "entity_owner",
            SortField::EntityKind => "entity_kind",
            SortField::Timestamp => "timestamp",
            SortField::MetricValue => "value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(super) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for DetailSort {
    fn default() -> Self {
        Self {
            field: SortField::Timestamp,
            order: SortOrder::Desc,
        }
    }
}

/// 1-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, page_size: 5 }
    }
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.page_size as i64
    }
}

/// One page of drill-down rows plus the filtered row count.
#[derive(Debug, Clone, Default)]
pub struct DetailPage {
    pub rows: Vec<MetricValueRecord>,
    pub total: i64,
}
