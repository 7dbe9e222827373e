//! Authorization: caller context, metric permission criteria and the
//! helpers that narrow metric definitions and entity refs to what a caller
//! may see.

mod allow_all;

pub use allow_all::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{CatalogApi, QueryEntitiesRequest};
use crate::error::{ScorecardError, ScorecardResult};
use crate::provider::Metric;

pub const CATALOG_ENTITY_READ: &str = "catalog.entity.read";
pub const METRIC_READ: &str = "scorecard.metric.read";

/// Page size used when walking the catalog for visible entities.
pub const CATALOG_PAGE_SIZE: usize = 500;

/// Permission collaborator error types.
#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("permission service unavailable: {0}")]
    Unavailable(String),
}

impl From<PermissionError> for ScorecardError {
    fn from(value: PermissionError) -> Self {
        Self::Collaborator(value.to_string())
    }
}

/// Identity of the caller, forwarded to every collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub principal: String,
    pub token: Option<String>,
}

impl AuthContext {
    pub fn user(principal: impl Into<String>, token: Option<String>) -> Self {
        Self {
            principal: principal.into(),
            token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub permission: String,
    pub resource_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeDecision {
    Allow,
    Deny,
}

/// Outcome of a conditional authorization for a resource type.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow,
    Deny,
    Conditional(PermissionCriteria),
}

/// A predicate tree over metric definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionCriteria {
    AnyOf(Vec<PermissionCriteria>),
    AllOf(Vec<PermissionCriteria>),
    Not(Box<PermissionCriteria>),
    Condition(MetricCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricCondition {
    HasMetricId {
        #[serde(rename = "metricIds")]
        metric_ids: Vec<String>,
    },
    HasDatasource {
        #[serde(rename = "datasourceIds")]
        datasource_ids: Vec<String>,
    },
}

impl MetricCondition {
    fn applies(&self, metric: &Metric) -> bool {
        match self {
            MetricCondition::HasMetricId { metric_ids } => metric_ids.iter().any(|id| *id == metric.id),
            MetricCondition::HasDatasource { datasource_ids } => datasource_ids
                .iter()
                .any(|ds| metric.datasource_id() == Some(ds.as_str())),
        }
    }
}

/// Authorization decisions for the caller.
#[async_trait]
pub trait PermissionsApi: Send + Sync {
    async fn authorize(
        &self,
        requests: &[AuthorizeRequest],
        ctx: &AuthContext,
    ) -> Result<Vec<AuthorizeDecision>, PermissionError>;

    async fn authorize_conditional(
        &self,
        permission: &str,
        ctx: &AuthContext,
    ) -> Result<PolicyDecision, PermissionError>;
}

/// Absent criteria always match.
pub fn matches(metric: &Metric, criteria: Option<&PermissionCriteria>) -> bool {
    match criteria {
        None => true,
        Some(criteria) => evaluate(metric, criteria),
    }
}

fn evaluate(metric: &Metric, criteria: &PermissionCriteria) -> bool {
    match criteria {
        PermissionCriteria::AnyOf(children) => children.iter().any(|c| evaluate(metric, c)),
        PermissionCriteria::AllOf(children) => children.iter().all(|c| evaluate(metric, c)),
        PermissionCriteria::Not(inner) => !evaluate(metric, inner),
        PermissionCriteria::Condition(condition) => condition.applies(metric),
    }
}

pub fn filter_authorized_metrics(metrics: Vec<Metric>, criteria: Option<&PermissionCriteria>) -> Vec<Metric> {
    metrics.into_iter().filter(|m| matches(m, criteria)).collect()
}

/// Fails with `NotAllowed` unless the caller may read the entity.
pub async fn check_entity_access(
    permissions: &dyn PermissionsApi,
    entity_ref: &str,
    ctx: &AuthContext,
) -> ScorecardResult<()> {
    let request = AuthorizeRequest {
        permission: CATALOG_ENTITY_READ.to_string(),
        resource_ref: Some(entity_ref.to_string()),
    };
    let decisions = permissions.authorize(&[request], ctx).await?;

    match decisions.first() {
        Some(AuthorizeDecision::Allow) => Ok(()),
        _ => Err(ScorecardError::NotAllowed(format!(
            "not allowed to read entity {}",
            entity_ref
        ))),
    }
}

/// Resolve the metric-read decision into an optional criteria tree.
pub async fn metric_read_criteria(
    permissions: &dyn PermissionsApi,
    ctx: &AuthContext,
) -> ScorecardResult<Option<PermissionCriteria>> {
    match permissions.authorize_conditional(METRIC_READ, ctx).await? {
        PolicyDecision::Allow => Ok(None),
        PolicyDecision::Deny => Err(ScorecardError::NotAllowed(
            "not allowed to read scorecard metrics".to_string(),
        )),
        PolicyDecision::Conditional(criteria) => Ok(Some(criteria)),
    }
}

/// Walk the catalog page by page and collect every ref the caller can see.
pub async fn resolve_visible_entity_refs(
    catalog: &dyn CatalogApi,
    ctx: &AuthContext,
) -> ScorecardResult<Vec<String>> {
    let mut refs = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let request = QueryEntitiesRequest {
            limit: CATALOG_PAGE_SIZE,
            cursor: cursor.clone(),
            fields: vec![
                "kind".to_string(),
                "metadata.name".to_string(),
                "metadata.namespace".to_string(),
            ],
        };
        let page = catalog.query_entities(request, ctx).await?;
        refs.extend(page.items.iter().map(|e| e.entity_ref()));

        match page.next_cursor {
            // A cursor that does not advance would loop forever.
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    tracing::debug!("Resolved {} visible entities for {}", refs.len(), ctx.principal);
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, Entity, EntityMetadata, QueryEntitiesPage};
    use crate::provider::MetricType;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn metric(id: &str) -> Metric {
        Metric {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            metric_type: MetricType::Number,
            history: false,
        }
    }

    fn has_ids(ids: &[&str]) -> PermissionCriteria {
        PermissionCriteria::Condition(MetricCondition::HasMetricId {
            metric_ids: ids.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_absent_criteria_match() {
        assert!(matches(&metric("github.openPrs"), None));
    }

    #[test]
    fn test_criteria_tree() {
        let m = metric("github.openPrs");
        assert!(matches(&m, Some(&has_ids(&["github.openPrs"]))));
        assert!(!matches(&m, Some(&has_ids(&["jira.openIssues"]))));

        let any = PermissionCriteria::AnyOf(vec![has_ids(&["x.y"]), has_ids(&["github.openPrs"])]);
        assert!(matches(&m, Some(&any)));

        let all = PermissionCriteria::AllOf(vec![has_ids(&["x.y"]), has_ids(&["github.openPrs"])]);
        assert!(!matches(&m, Some(&all)));

        let not = PermissionCriteria::Not(Box::new(has_ids(&["github.openPrs"])));
        assert!(!matches(&m, Some(&not)));

        let by_source = PermissionCriteria::Condition(MetricCondition::HasDatasource {
            datasource_ids: vec!["github".to_string()],
        });
        assert!(matches(&m, Some(&by_source)));
    }

    #[test]
    fn test_criteria_deserialize() {
        let raw = r#"{"anyOf":[{"condition":{"rule":"HAS_METRIC_ID","metricIds":["github.openPrs"]}}]}"#;
        let criteria: PermissionCriteria = serde_json::from_str(raw).unwrap();
        assert!(matches(&metric("github.openPrs"), Some(&criteria)));
    }

    #[test]
    fn test_filter_authorized_metrics() {
        let metrics = vec![metric("github.openPrs"), metric("jira.openIssues")];
        let visible = filter_authorized_metrics(metrics, Some(&has_ids(&["jira.openIssues"])));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "jira.openIssues");
    }

    struct DenyAll;

    #[async_trait]
    impl PermissionsApi for DenyAll {
        async fn authorize(
            &self,
            requests: &[AuthorizeRequest],
            _ctx: &AuthContext,
        ) -> Result<Vec<AuthorizeDecision>, PermissionError> {
            Ok(vec![AuthorizeDecision::Deny; requests.len()])
        }

        async fn authorize_conditional(
            &self,
            _permission: &str,
            _ctx: &AuthContext,
        ) -> Result<PolicyDecision, PermissionError> {
            Ok(PolicyDecision::Deny)
        }
    }

    #[tokio::test]
    async fn test_check_entity_access() {
        let ctx = AuthContext::user("user:default/tester", None);
        assert!(check_entity_access(&AllowAllPermissions, "component:default/a", &ctx)
            .await
            .is_ok());

        let err = check_entity_access(&DenyAll, "component:default/a", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorecardError::NotAllowed(_)));

        let err = metric_read_criteria(&DenyAll, &ctx).await.unwrap_err();
        assert!(matches!(err, ScorecardError::NotAllowed(_)));
    }

    /// Serves `total` entities in pages and records every request.
    struct PagedCatalog {
        total: usize,
        requests: Mutex<Vec<QueryEntitiesRequest>>,
    }

    #[async_trait]
    impl CatalogApi for PagedCatalog {
        async fn get_entity_by_ref(&self, _: &str, _: &AuthContext) -> Result<Option<Entity>, CatalogError> {
            Ok(None)
        }

        async fn get_entities_by_refs(
            &self,
            refs: &[String],
            _: &[&str],
            _: &AuthContext,
        ) -> Result<Vec<Option<Entity>>, CatalogError> {
            Ok(vec![None; refs.len()])
        }

        async fn query_entities(
            &self,
            request: QueryEntitiesRequest,
            _: &AuthContext,
        ) -> Result<QueryEntitiesPage, CatalogError> {
            let offset: usize = request.cursor.as_deref().map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (offset + request.limit).min(self.total);
            let items = (offset..end)
                .map(|i| Entity {
                    kind: "Component".to_string(),
                    metadata: EntityMetadata {
                        name: format!("svc-{}", i),
                        namespace: "default".to_string(),
                        title: None,
                        description: None,
                        annotations: BTreeMap::new(),
                        tags: vec![],
                    },
                    spec: serde_json::Value::Null,
                })
                .collect();
            self.requests.lock().unwrap().push(request);
            Ok(QueryEntitiesPage {
                items,
                next_cursor: (end < self.total).then(|| end.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_resolve_visible_entity_refs_follows_cursors() {
        let catalog = PagedCatalog {
            total: 1203,
            requests: Mutex::new(Vec::new()),
        };
        let refs = resolve_visible_entity_refs(&catalog, &AuthContext::user("user:default/tester", None))
            .await
            .unwrap();

        assert_eq!(refs.len(), 1203);
        assert_eq!(refs[0], "component:default/svc-0");
        let requests = catalog.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.limit == CATALOG_PAGE_SIZE));
        assert_eq!(requests[2].cursor.as_deref(), Some("1000"));
    }
}
