//! Metric providers: the computation units that score an entity.
//!
//! A provider is either single-metric (implements [`MetricProvider::calculate`])
//! or batch (overrides `metric_ids`, `metrics` and
//! [`MetricProvider::calculate_many`]). Call sites always go through
//! `calculate_many`, whose default adapts a single-metric provider.

mod builtin;
mod registry;

pub use builtin::*;
pub use registry::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::catalog::{CatalogFilter, Entity};
use crate::threshold::ThresholdConfig;

/// Provider calculation error types.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("calculation failed: {0}")]
    Calculation(String),
    #[error("provider {0} does not support single-metric calculation")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Number,
    Boolean,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Number => "number",
            MetricType::Boolean => "boolean",
        }
    }
}

/// Definition of a measurable property. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub history: bool,
}

impl Metric {
    /// The `<datasource>` part of a `<datasource>.<name>` id.
    pub fn datasource_id(&self) -> Option<&str> {
        self.id.split_once('.').map(|(ds, _)| ds)
    }
}

/// A computed metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Boolean(bool),
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Number(_) => MetricType::Number,
            MetricValue::Boolean(_) => MetricType::Boolean,
        }
    }

    /// Storage encoding: booleans persist as 1.0 / 0.0.
    pub fn to_stored(self) -> f64 {
        match self {
            MetricValue::Number(n) => n,
            MetricValue::Boolean(true) => 1.0,
            MetricValue::Boolean(false) => 0.0,
        }
    }

    pub fn from_stored(value: f64, metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Number => MetricValue::Number(value),
            MetricType::Boolean => MetricValue::Boolean(value != 0.0),
        }
    }
}

/// Computes one or more metric values for an entity.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    fn datasource_id(&self) -> &str;

    /// Prefix of every metric id this provider emits.
    fn provider_id(&self) -> &str;

    fn metric_type(&self) -> MetricType;

    /// The primary metric definition.
    fn metric(&self) -> Metric;

    fn default_thresholds(&self) -> ThresholdConfig;

    /// Entities this provider applies to.
    fn catalog_filter(&self) -> CatalogFilter {
        CatalogFilter::any()
    }

    fn metric_ids(&self) -> Vec<String> {
        vec![self.provider_id().to_string()]
    }

    fn metrics(&self) -> Vec<Metric> {
        vec![self.metric()]
    }

    async fn calculate(&self, _entity: &Entity) -> Result<MetricValue, ProviderError> {
        Err(ProviderError::Unsupported(self.provider_id().to_string()))
    }

    async fn calculate_many(&self, entity: &Entity) -> Result<HashMap<String, MetricValue>, ProviderError> {
        let value = self.calculate(entity).await?;
        Ok(HashMap::from([(self.provider_id().to_string(), value)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_encoding() {
        assert_eq!(MetricValue::Boolean(true).to_stored(), 1.0);
        assert_eq!(MetricValue::from_stored(0.0, MetricType::Boolean), MetricValue::Boolean(false));
        assert_eq!(MetricValue::from_stored(41.5, MetricType::Number), MetricValue::Number(41.5));
    }

    #[test]
    fn test_metric_serializes_type_field() {
        let metric = Metric {
            id: "github.openPrs".to_string(),
            title: "Open PRs".to_string(),
            description: "Open pull requests".to_string(),
            metric_type: MetricType::Number,
            history: true,
        };
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(metric.datasource_id(), Some("github"));
    }
}
