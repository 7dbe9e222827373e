//! Registry mapping metric ids to the providers that compute them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{Metric, MetricProvider};
use crate::error::{ScorecardError, ScorecardResult};

/// Holds every registered provider.
///
/// Populated once during startup through `&mut self`, then shared
/// read-only behind an `Arc`.
#[derive(Default)]
pub struct MetricProviderRegistry {
    providers: HashMap<String, Arc<dyn MetricProvider>>,
    by_datasource: HashMap<String, BTreeSet<String>>,
    /// Metric ids in registration order.
    order: Vec<String>,
}

impl MetricProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every metric id the provider emits.
    ///
    /// Ids are validated and indexed one at a time: when a later id fails,
    /// the ids before it stay registered.
    pub fn register(&mut self, provider: Arc<dyn MetricProvider>) -> ScorecardResult<()> {
        let metric_ids = provider.metric_ids();
        let metrics = provider.metrics();
        let datasource_id = provider.datasource_id().to_string();
        let prefix = format!("{}.", datasource_id);

        for metric_id in metric_ids {
            let metric = metrics.iter().find(|m| m.id == metric_id).ok_or_else(|| {
                ScorecardError::validation(format!(
                    "Invalid metric provider with ID {}, provider must have a metric with ID {}",
                    provider.provider_id(),
                    metric_id
                ))
            })?;

            if metric.metric_type != provider.metric_type() {
                return Err(ScorecardError::validation(format!(
                    "Invalid metric provider with ID {}, metric {} has type {} but provider declares {}",
                    provider.provider_id(),
                    metric_id,
                    metric.metric_type.as_str(),
                    provider.metric_type().as_str()
                )));
            }

            if !metric_id.starts_with(&prefix) || metric_id.len() == prefix.len() {
                return Err(ScorecardError::validation(format!(
                    "Invalid metric provider with ID {}, metric ID must be in format '{}.<metric_name>'",
                    metric_id, datasource_id
                )));
            }

            if self.providers.contains_key(&metric_id) {
                return Err(ScorecardError::Conflict(format!(
                    "Metric provider with ID {} has already been registered",
                    metric_id
                )));
            }

            self.providers.insert(metric_id.clone(), provider.clone());
            self.by_datasource
                .entry(datasource_id.clone())
                .or_default()
                .insert(metric_id.clone());
            self.order.push(metric_id.clone());
            tracing::info!("Registered metric {} from datasource {}", metric_id, datasource_id);
        }

        Ok(())
    }

    pub fn get_provider(&self, metric_id: &str) -> ScorecardResult<Arc<dyn MetricProvider>> {
        self.providers
            .get(metric_id)
            .cloned()
            .ok_or_else(|| ScorecardError::not_found(format!("Metric provider with ID {} is not registered", metric_id)))
    }

    pub fn get_metric(&self, metric_id: &str) -> ScorecardResult<Metric> {
        let provider = self.get_provider(metric_id)?;
        provider
            .metrics()
            .into_iter()
            .find(|m| m.id == metric_id)
            .ok_or_else(|| ScorecardError::not_found(format!("Metric with ID {} is not registered", metric_id)))
    }

    /// Each provider once, however many metric ids it emits.
    pub fn list_providers(&self) -> Vec<Arc<dyn MetricProvider>> {
        let mut seen: Vec<Arc<dyn MetricProvider>> = Vec::new();
        for metric_id in &self.order {
            if let Some(provider) = self.providers.get(metric_id) {
                if !seen.iter().any(|p| same_provider(p, provider)) {
                    seen.push(provider.clone());
                }
            }
        }
        seen
    }

    /// All registered metrics, or the requested subset in request order.
    pub fn list_metrics(&self, metric_ids: Option<&[String]>) -> ScorecardResult<Vec<Metric>> {
        match metric_ids {
            Some(ids) => ids.iter().map(|id| self.get_metric(id)).collect(),
            None => self.order.iter().map(|id| self.get_metric(id)).collect(),
        }
    }

    pub fn list_metrics_by_datasource(&self, datasource_id: &str) -> ScorecardResult<Vec<Metric>> {
        match self.by_datasource.get(datasource_id) {
            Some(ids) => ids.iter().map(|id| self.get_metric(id)).collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

fn same_provider(a: &Arc<dyn MetricProvider>, b: &Arc<dyn MetricProvider>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
