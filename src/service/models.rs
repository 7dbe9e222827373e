//! Response shapes produced by the metric service.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{MetricStatus, Pagination};
use crate::provider::{Metric, MetricType, MetricValue};
use crate::threshold::ThresholdConfig;

pub const MISSING_VALUE_MESSAGE: &str = "metric value is missing";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMetadata {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
}

impl From<&Metric> for MetricMetadata {
    fn from(metric: &Metric) -> Self {
        Self {
            title: metric.title.clone(),
            description: metric.description.clone(),
            metric_type: metric.metric_type,
        }
    }
}

/// Whether the value itself was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdResult {
    pub definition: Option<ThresholdConfig>,
    pub status: Option<MetricStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ThresholdResult {
    pub fn passed(definition: ThresholdConfig, status: MetricStatus) -> Self {
        Self {
            definition: Some(definition),
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(definition: Option<ThresholdConfig>, error: impl Into<String>) -> Self {
        Self {
            definition,
            status: Some(MetricStatus::Error),
            error: Some(error.into()),
        }
    }
}

/// One metric's current result for an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub id: String,
    pub status: CalculationStatus,
    pub metadata: MetricMetadata,
    pub result: Option<MetricValue>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub threshold_result: ThresholdResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub name: MetricStatus,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetric {
    pub values: Vec<StatusCount>,
    pub total: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetricResult {
    pub id: String,
    pub status: CalculationStatus,
    pub metadata: MetricMetadata,
    pub result: AggregatedMetric,
}

/// One drill-down row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetricDetail {
    pub entity_ref: String,
    pub entity_name: String,
    pub entity_kind: Option<String>,
    pub owner: Option<String>,
    pub metric_value: Option<MetricValue>,
    pub timestamp: DateTime<Utc>,
    pub status: Option<MetricStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl PageInfo {
    pub fn new(pagination: Pagination, total: i64) -> Self {
        let size = pagination.page_size.max(1) as i64;
        Self {
            page: pagination.page,
            page_size: pagination.page_size,
            total,
            total_pages: (total + size - 1) / size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetricDetailResponse {
    pub metric_id: String,
    pub metric_metadata: MetricMetadata,
    pub entities: Vec<EntityMetricDetail>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricHistoryPoint {
    pub value: Option<MetricValue>,
    pub timestamp: DateTime<Utc>,
    pub status: Option<MetricStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
