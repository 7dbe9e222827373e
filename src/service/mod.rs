//! Metric service: ties the registry, thresholds, permissions, catalog and
//! store together to answer entity, aggregation and drill-down queries.

mod models;
mod query;

pub use models::*;
pub use query::*;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{CatalogApi, Entity, EntityRef};
use crate::db::{MetricStatus, MetricValueRecord, Store};
use crate::error::{ScorecardError, ScorecardResult};
use crate::permission::{self, AuthContext, PermissionCriteria, PermissionsApi};
use crate::provider::{Metric, MetricProvider, MetricProviderRegistry, MetricValue};
use crate::threshold::{self, ThresholdConfig};

/// Fields requested from the catalog when enriching drill-down rows.
const DETAIL_FIELDS: &[&str] = &[
    "kind",
    "metadata.name",
    "metadata.namespace",
    "metadata.title",
    "spec.owner",
];

const REF_FIELDS: &[&str] = &["kind", "metadata.name", "metadata.namespace"];

pub struct MetricService {
    registry: Arc<MetricProviderRegistry>,
    store: Arc<Store>,
    catalog: Arc<dyn CatalogApi>,
    permissions: Arc<dyn PermissionsApi>,
}

impl MetricService {
    pub fn new(
        registry: Arc<MetricProviderRegistry>,
        store: Arc<Store>,
        catalog: Arc<dyn CatalogApi>,
        permissions: Arc<dyn PermissionsApi>,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            permissions,
        }
    }

    pub fn catalog(&self) -> &dyn CatalogApi {
        self.catalog.as_ref()
    }

    pub fn permissions(&self) -> &dyn PermissionsApi {
        self.permissions.as_ref()
    }

    pub fn get_metric(&self, metric_id: &str) -> ScorecardResult<Metric> {
        self.registry.get_metric(metric_id)
    }

    /// Registered metrics visible under the criteria, optionally narrowed to
    /// one datasource.
    pub fn list_metrics(
        &self,
        datasource_id: Option<&str>,
        permission_filter: Option<&PermissionCriteria>,
    ) -> ScorecardResult<Vec<Metric>> {
        let metrics = match datasource_id {
            Some(ds) => self.registry.list_metrics_by_datasource(ds)?,
            None => self.registry.list_metrics(None)?,
        };
        Ok(permission::filter_authorized_metrics(metrics, permission_filter))
    }

    /// Current value and threshold outcome of each visible metric for one
    /// entity. Metrics never recorded for the entity are omitted.
    pub async fn get_latest_entity_metrics(
        &self,
        entity_ref: &str,
        metric_ids: Option<&[String]>,
        permission_filter: Option<&PermissionCriteria>,
        ctx: &AuthContext,
    ) -> ScorecardResult<Vec<MetricResult>> {
        let entity = self.resolve_entity(entity_ref, ctx).await?;
        let entity_ref = entity.entity_ref();

        let metrics = permission::filter_authorized_metrics(self.registry.list_metrics(metric_ids)?, permission_filter);
        if metrics.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = metrics.iter().map(|m| m.id.clone()).collect();
        let by_id: HashMap<&str, &Metric> = metrics.iter().map(|m| (m.id.as_str(), m)).collect();
        let rows = self.store.latest_for(&entity_ref, &ids)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(metric) = by_id.get(row.metric_id.as_str()) else {
                continue;
            };
            let provider = match self.registry.get_provider(&row.metric_id) {
                Ok(provider) => provider,
                Err(e) => {
                    tracing::warn!("Skipping {} for {}: {}", row.metric_id, entity_ref, e);
                    continue;
                }
            };
            results.push(stored_result(&entity, provider.as_ref(), metric, row));
        }

        Ok(results)
    }

    /// Status counts for one metric over the latest value of each entity.
    pub fn get_aggregated_metric_by_entity_refs(
        &self,
        entity_refs: &[String],
        metric_id: &str,
    ) -> ScorecardResult<AggregatedMetricResult> {
        let metric = self.registry.get_metric(metric_id)?;
        let counts = self.store.aggregate(entity_refs, metric_id)?;

        Ok(AggregatedMetricResult {
            id: metric.id.clone(),
            status: CalculationStatus::Success,
            metadata: MetricMetadata::from(&metric),
            result: AggregatedMetric {
                values: MetricStatus::ALL
                    .iter()
                    .map(|&name| StatusCount {
                        name,
                        count: match name {
                            MetricStatus::Success => counts.success,
                            MetricStatus::Warning => counts.warning,
                            MetricStatus::Error => counts.error,
                        },
                    })
                    .collect(),
                total: counts.total,
                timestamp: counts.max_timestamp,
            },
        })
    }

    /// The subset of `entity_refs` the catalog resolves for the caller, in
    /// request order. A failed lookup yields no refs.
    pub async fn readable_entity_refs(&self, entity_refs: &[String], ctx: &AuthContext) -> Vec<String> {
        if entity_refs.is_empty() {
            return Vec::new();
        }
        let found = match self.catalog.get_entities_by_refs(entity_refs, REF_FIELDS, ctx).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Catalog lookup failed while resolving readable entities: {}", e);
                return Vec::new();
            }
        };

        entity_refs
            .iter()
            .zip(found)
            .filter_map(|(entity_ref, entity)| entity.map(|_| entity_ref.clone()))
            .collect()
    }

    /// One page of per-entity rows for a metric.
    ///
    /// Rows are only returned for entities the catalog confirms the caller
    /// can read. When the catalog lookup fails the page is empty.
    pub async fn get_entity_metric_details(
        &self,
        metric_id: &str,
        ctx: &AuthContext,
        options: EntityMetricDetailsOptions,
    ) -> ScorecardResult<EntityMetricDetailResponse> {
        let metric = self.registry.get_metric(metric_id)?;
        if !permission::matches(&metric, options.permission_filter.as_ref()) {
            return Err(ScorecardError::NotAllowed(format!(
                "not allowed to read metric {}",
                metric_id
            )));
        }

        let page = self
            .store
            .query_details(metric_id, &options.filters, options.sort, options.pagination)?;
        let mut response = EntityMetricDetailResponse {
            metric_id: metric.id.clone(),
            metric_metadata: MetricMetadata::from(&metric),
            entities: Vec::new(),
            pagination: PageInfo::new(options.pagination, page.total),
        };
        if page.rows.is_empty() {
            return Ok(response);
        }

        let refs: Vec<String> = page.rows.iter().map(|r| r.entity_ref.clone()).collect();
        let found = match self.catalog.get_entities_by_refs(&refs, DETAIL_FIELDS, ctx).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    "Catalog lookup failed for {} drill-down, returning no entities: {}",
                    metric_id,
                    e
                );
                return Ok(response);
            }
        };

        let mut dropped = 0;
        for (i, row) in page.rows.into_iter().enumerate() {
            let Some(Some(entity)) = found.get(i) else {
                dropped += 1;
                continue;
            };
            response.entities.push(EntityMetricDetail {
                entity_name: entity.display_name(),
                entity_kind: Some(entity.kind.clone()).filter(|k| !k.is_empty()).or(row.entity_kind),
                owner: entity.owner_ref().or(row.entity_owner),
                metric_value: row.value.map(|v| MetricValue::from_stored(v, metric.metric_type)),
                timestamp: row.timestamp,
                status: row.status,
                entity_ref: row.entity_ref,
            });
        }
        if dropped > 0 {
            tracing::warn!("Dropped {} unresolved entities from {} drill-down", dropped, metric_id);
        }

        Ok(response)
    }

    /// Newest-first recorded values of one metric for one entity.
    pub async fn get_metric_history(
        &self,
        entity_ref: &str,
        metric_id: &str,
        limit: u32,
        ctx: &AuthContext,
    ) -> ScorecardResult<Vec<MetricHistoryPoint>> {
        let entity = self.resolve_entity(entity_ref, ctx).await?;
        let metric = self.registry.get_metric(metric_id)?;
        if !metric.history {
            return Err(ScorecardError::validation(format!(
                "Metric {} does not retain history",
                metric_id
            )));
        }

        let rows = self.store.history(&entity.entity_ref(), metric_id, limit)?;
        Ok(rows
            .into_iter()
            .map(|row| MetricHistoryPoint {
                value: row.value.map(|v| MetricValue::from_stored(v, metric.metric_type)),
                timestamp: row.timestamp,
                status: row.status,
                error: row.error_message,
            })
            .collect())
    }

    /// Run every applicable provider for the entity and record the results.
    ///
    /// Providers run concurrently. A provider that fails or panics yields
    /// error results for its own metrics and never affects the others.
    pub async fn refresh_entity_metrics(&self, entity_ref: &str, ctx: &AuthContext) -> ScorecardResult<Vec<MetricResult>> {
        let entity = self.resolve_entity(entity_ref, ctx).await?;

        let mut pending = Vec::new();
        for provider in self.registry.list_providers() {
            if !provider.catalog_filter().matches(&entity) {
                continue;
            }
            let metric_ids: Vec<String> = provider
                .metric_ids()
                .into_iter()
                .filter(|id| self.registry.get_provider(id).is_ok())
                .collect();
            let task_provider = provider.clone();
            let task_entity = entity.clone();
            let handle = tokio::spawn(async move { task_provider.calculate_many(&task_entity).await });
            pending.push((provider, metric_ids, handle));
        }

        let now = Utc::now();
        let mut records = Vec::new();
        let mut results = Vec::new();

        for (provider, metric_ids, handle) in pending {
            let outcome: Result<HashMap<String, MetricValue>, String> = match handle.await {
                Ok(Ok(values)) => Ok(values),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("provider task failed: {}", e)),
            };
            if let Err(e) = &outcome {
                tracing::warn!("Provider {} failed for {}: {}", provider.provider_id(), entity.entity_ref(), e);
            }

            for metric_id in metric_ids {
                let metric = self.registry.get_metric(&metric_id)?;
                let (value, error) = match &outcome {
                    Ok(values) => match values.get(&metric_id) {
                        Some(v) if v.metric_type() == metric.metric_type => (Some(*v), None),
                        Some(_) => (None, Some(format!("provider returned a value of the wrong type for {}", metric_id))),
                        None => (None, Some(format!("provider returned no value for {}", metric_id))),
                    },
                    Err(e) => (None, Some(e.clone())),
                };

                let definition = threshold::merge(&entity, provider.as_ref(), &metric_id);
                let threshold_result = match definition {
                    Ok(definition) => threshold_result_for(value, error.as_deref(), definition),
                    Err(e) => ThresholdResult::failed(None, e.to_string()),
                };

                records.push(MetricValueRecord {
                    entity_ref: entity.entity_ref(),
                    metric_id: metric_id.clone(),
                    value: value.map(MetricValue::to_stored),
                    timestamp: now,
                    error_message: error.clone(),
                    status: threshold_result.status,
                    entity_kind: Some(entity.kind.clone()),
                    entity_owner: entity.owner_ref(),
                    ..Default::default()
                });
                results.push(MetricResult {
                    id: metric_id,
                    status: if error.is_some() { CalculationStatus::Error } else { CalculationStatus::Success },
                    metadata: MetricMetadata::from(&metric),
                    result: value,
                    timestamp: Some(now),
                    error,
                    threshold_result,
                });
            }
        }

        let written = self.store.append(&records)?;
        tracing::info!("Recorded {} metric values for {}", written, entity.entity_ref());

        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Fetch the entity and confirm the caller may read it.
    async fn resolve_entity(&self, entity_ref: &str, ctx: &AuthContext) -> ScorecardResult<Entity> {
        let entity_ref = EntityRef::parse(entity_ref)?.to_string();
        let entity = self
            .catalog
            .get_entity_by_ref(&entity_ref, ctx)
            .await?
            .ok_or_else(|| ScorecardError::not_found(format!("Entity not found: {}", entity_ref)))?;
        permission::check_entity_access(self.permissions.as_ref(), &entity_ref, ctx).await?;
        Ok(entity)
    }
}

/// Build the public result for a persisted row.
fn stored_result(entity: &Entity, provider: &dyn MetricProvider, metric: &Metric, row: MetricValueRecord) -> MetricResult {
    let value = row.value.map(|v| MetricValue::from_stored(v, metric.metric_type));
    let calculation_failed = row.error_message.is_some() && value.is_none();

    let threshold_result = match threshold::merge(entity, provider, &metric.id) {
        Ok(definition) => threshold_result_for(value, row.error_message.as_deref(), definition),
        Err(e) => {
            tracing::warn!("Threshold merge failed for {} on {}: {}", metric.id, row.entity_ref, e);
            ThresholdResult::failed(None, e.to_string())
        }
    };

    MetricResult {
        id: metric.id.clone(),
        status: if calculation_failed { CalculationStatus::Error } else { CalculationStatus::Success },
        metadata: MetricMetadata::from(metric),
        result: value,
        timestamp: Some(row.timestamp),
        error: row.error_message,
        threshold_result,
    }
}

/// Missing value first, then a recorded error, then the rules themselves.
/// A value no rule matches is reported as an error.
fn threshold_result_for(value: Option<MetricValue>, error: Option<&str>, definition: ThresholdConfig) -> ThresholdResult {
    let Some(value) = value else {
        return ThresholdResult::failed(Some(definition), MISSING_VALUE_MESSAGE);
    };
    if let Some(error) = error {
        return ThresholdResult::failed(Some(definition), error);
    }

    match threshold::evaluate(value, &definition) {
        Some(status) => ThresholdResult::passed(definition, status),
        None => {
            let message = format!("no threshold rule matched value {}", render_value(value));
            ThresholdResult::failed(Some(definition), message)
        }
    }
}

fn render_value(value: MetricValue) -> String {
    match value {
        MetricValue::Number(n) => n.to_string(),
        MetricValue::Boolean(b) => b.to_string(),
    }
}
