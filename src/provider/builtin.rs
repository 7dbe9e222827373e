//! Metrics computed from the catalog entity itself.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{Metric, MetricProvider, MetricType, MetricValue, ProviderError};
use crate::catalog::{CatalogFilter, Entity};
use crate::db::MetricStatus;
use crate::threshold::{ThresholdConfig, ThresholdRule};

pub const CATALOG_DATASOURCE: &str = "catalog";
pub const HAS_DESCRIPTION: &str = "catalog.hasDescription";
pub const HAS_OWNER: &str = "catalog.hasOwner";

/// Batch provider scoring basic catalog hygiene.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogCompletenessProvider;

impl CatalogCompletenessProvider {
    fn definition(id: &str, title: &str, description: &str) -> Metric {
        Metric {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            metric_type: MetricType::Boolean,
            history: true,
        }
    }
}

#[async_trait]
impl MetricProvider for CatalogCompletenessProvider {
    fn datasource_id(&self) -> &str {
        CATALOG_DATASOURCE
    }

    fn provider_id(&self) -> &str {
        CATALOG_DATASOURCE
    }

    fn metric_type(&self) -> MetricType {
        MetricType::Boolean
    }

    fn metric(&self) -> Metric {
        Self::definition(
            HAS_DESCRIPTION,
            "Has description",
            "Whether the entity declares a non-empty description.",
        )
    }

    fn default_thresholds(&self) -> ThresholdConfig {
        ThresholdConfig::new(vec![
            ThresholdRule::new(MetricStatus::Success, "==true"),
            ThresholdRule::new(MetricStatus::Error, "==false"),
        ])
    }

    fn catalog_filter(&self) -> CatalogFilter {
        CatalogFilter::with("kind", &["Component", "API", "System"])
    }

    fn metric_ids(&self) -> Vec<String> {
        vec![HAS_DESCRIPTION.to_string(), HAS_OWNER.to_string()]
    }

    fn metrics(&self) -> Vec<Metric> {
        vec![
            self.metric(),
            Self::definition(HAS_OWNER, "Has owner", "Whether the entity declares an owner."),
        ]
    }

    async fn calculate_many(&self, entity: &Entity) -> Result<HashMap<String, MetricValue>, ProviderError> {
        let has_description = entity
            .metadata
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());

        Ok(HashMap::from([
            (HAS_DESCRIPTION.to_string(), MetricValue::Boolean(has_description)),
            (HAS_OWNER.to_string(), MetricValue::Boolean(entity.owner_ref().is_some())),
        ]))
    }
}
