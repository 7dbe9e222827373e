//! HTTP request handlers.

use super::AppState;
use crate::catalog::EntityRef;
use crate::error::{ScorecardError, ScorecardResult};
use crate::permission::{self, AuthContext, PermissionCriteria};
use crate::provider::Metric;
use crate::service::{
    AggregatedMetricResult, DrillDownParams, EntityMetricDetailResponse, MetricHistoryPoint, MetricResult,
};

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const USER_HEADER: &str = "x-scorecard-user";
pub const GUEST_USER: &str = "user:default/guest";
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub const MAX_HISTORY_LIMIT: u32 = 1000;

// ============================================================================
// Errors and request context
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    name: &'static str,
    message: String,
}

impl ScorecardError {
    fn status_and_name(&self) -> (StatusCode, &'static str) {
        match self {
            ScorecardError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFoundError"),
            ScorecardError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ScorecardError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            ScorecardError::Input(_) => (StatusCode::BAD_REQUEST, "InputError"),
            ScorecardError::NotAllowed(_) => (StatusCode::FORBIDDEN, "NotAllowedError"),
            ScorecardError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ScorecardError::Collaborator(_) => (StatusCode::BAD_GATEWAY, "ServiceUnavailableError"),
        }
    }
}

impl IntoResponse for ScorecardError {
    fn into_response(self) -> Response {
        let (status, name) = self.status_and_name();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            name,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Caller identity from the request headers. Requests without a user header
/// act as the guest user.
pub fn auth_context(headers: &HeaderMap) -> AuthContext {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let principal = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(GUEST_USER);

    AuthContext::user(principal, token)
}

/// Split a comma-separated parameter. Blank input means "not given".
pub fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn path_entity_ref(kind: &str, namespace: &str, name: &str) -> ScorecardResult<String> {
    Ok(EntityRef::parse(&format!("{}:{}/{}", kind, namespace, name))?.to_string())
}

fn parse_history_limit(raw: Option<&str>) -> ScorecardResult<u32> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_HISTORY_LIMIT);
    };
    match raw.parse::<u32>() {
        Ok(n) if (1..=MAX_HISTORY_LIMIT).contains(&n) => Ok(n),
        _ => Err(ScorecardError::input(format!(
            "limit must be an integer between 1 and {}; got '{}'",
            MAX_HISTORY_LIMIT, raw
        ))),
    }
}

/// Query-string failures surface as input errors like every other bad
/// parameter.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> ScorecardResult<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ScorecardError::input(rejection.body_text()))
}

async fn read_criteria(state: &AppState, ctx: &AuthContext) -> ScorecardResult<Option<PermissionCriteria>> {
    permission::metric_read_criteria(state.service.permissions(), ctx).await
}

// ============================================================================
// API: Metrics
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub datasource: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<Metric>,
}

pub async fn handle_list_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> ScorecardResult<Json<MetricsResponse>> {
    let query = query_params(query)?;
    let ctx = auth_context(&headers);
    let criteria = read_criteria(&state, &ctx).await?;
    let datasource = query.datasource.as_deref().map(str::trim).filter(|d| !d.is_empty());

    let metrics = state.service.list_metrics(datasource, criteria.as_ref())?;
    Ok(Json(MetricsResponse { metrics }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationQuery {
    /// Comma-separated refs, narrowed to those the caller can read; all
    /// visible entities when absent.
    pub entity_refs: Option<String>,
}

pub async fn handle_get_aggregation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(metric_id): Path<String>,
    query: Result<Query<AggregationQuery>, QueryRejection>,
) -> ScorecardResult<Json<AggregatedMetricResult>> {
    let query = query_params(query)?;
    let ctx = auth_context(&headers);
    let criteria = read_criteria(&state, &ctx).await?;
    let metric = state.service.get_metric(&metric_id)?;
    if !permission::matches(&metric, criteria.as_ref()) {
        return Err(ScorecardError::NotAllowed(format!("not allowed to read metric {}", metric_id)));
    }

    let entity_refs = match split_list(query.entity_refs.as_deref()) {
        Some(refs) => {
            let requested = refs
                .iter()
                .map(|r| EntityRef::parse(r).map(|parsed| parsed.to_string()))
                .collect::<ScorecardResult<Vec<_>>>()?;
            state.service.readable_entity_refs(&requested, &ctx).await
        }
        None => permission::resolve_visible_entity_refs(state.service.catalog(), &ctx).await?,
    };

    Ok(Json(state.service.get_aggregated_metric_by_entity_refs(&entity_refs, &metric_id)?))
}

pub async fn handle_get_metric_entities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(metric_id): Path<String>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ScorecardResult<Json<EntityMetricDetailResponse>> {
    let ctx = auth_context(&headers);
    let mut options = DrillDownParams::from_pairs(query_params(query)?)?.into_options()?;
    options.permission_filter = read_criteria(&state, &ctx).await?;

    let response = state.service.get_entity_metric_details(&metric_id, &ctx, options).await?;
    Ok(Json(response))
}

// ============================================================================
// API: Entity metrics
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetricsQuery {
    pub metric_ids: Option<String>,
}

pub async fn handle_get_entity_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    query: Result<Query<EntityMetricsQuery>, QueryRejection>,
) -> ScorecardResult<Json<Vec<MetricResult>>> {
    let query = query_params(query)?;
    let ctx = auth_context(&headers);
    let entity_ref = path_entity_ref(&kind, &namespace, &name)?;
    let criteria = read_criteria(&state, &ctx).await?;
    let metric_ids = split_list(query.metric_ids.as_deref());

    let results = state
        .service
        .get_latest_entity_metrics(&entity_ref, metric_ids.as_deref(), criteria.as_ref(), &ctx)
        .await?;
    Ok(Json(results))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

pub async fn handle_get_metric_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, namespace, name, metric_id)): Path<(String, String, String, String)>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ScorecardResult<Json<Vec<MetricHistoryPoint>>> {
    let query = query_params(query)?;
    let ctx = auth_context(&headers);
    let entity_ref = path_entity_ref(&kind, &namespace, &name)?;
    let limit = parse_history_limit(query.limit.as_deref())?;

    let criteria = read_criteria(&state, &ctx).await?;
    let metric = state.service.get_metric(&metric_id)?;
    if !permission::matches(&metric, criteria.as_ref()) {
        return Err(ScorecardError::NotAllowed(format!("not allowed to read metric {}", metric_id)));
    }

    let points = state
        .service
        .get_metric_history(&entity_ref, &metric_id, limit, &ctx)
        .await?;
    Ok(Json(points))
}

pub async fn handle_refresh_entity_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> ScorecardResult<Json<Vec<MetricResult>>> {
    let ctx = auth_context(&headers);
    let entity_ref = path_entity_ref(&kind, &namespace, &name)?;
    let criteria = read_criteria(&state, &ctx).await?;

    let results = state.service.refresh_entity_metrics(&entity_ref, &ctx).await?;

    // Everything is recorded; only readable metrics are returned.
    let visible: HashSet<String> = state
        .service
        .list_metrics(None, criteria.as_ref())?
        .into_iter()
        .map(|m| m.id)
        .collect();
    Ok(Json(results.into_iter().filter(|r| visible.contains(&r.id)).collect()))
}

pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogApi, CatalogError, Entity, QueryEntitiesPage, QueryEntitiesRequest};
    use crate::config::ServerConfig;
    use crate::db::{DbError, MetricStatus, MetricValueRecord, Store};
    use crate::permission::AllowAllPermissions;
    use crate::provider::{CatalogCompletenessProvider, MetricProviderRegistry, HAS_DESCRIPTION};
    use crate::service::MetricService;
    use async_trait::async_trait;
    use axum::http::{HeaderValue, Uri};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    /// A catalog in which the caller can see nothing.
    struct EmptyView;

    #[async_trait]
    impl CatalogApi for EmptyView {
        async fn get_entity_by_ref(&self, _entity_ref: &str, _ctx: &AuthContext) -> Result<Option<Entity>, CatalogError> {
            Ok(None)
        }

        async fn get_entities_by_refs(
            &self,
            entity_refs: &[String],
            _fields: &[&str],
            _ctx: &AuthContext,
        ) -> Result<Vec<Option<Entity>>, CatalogError> {
            Ok(vec![None; entity_refs.len()])
        }

        async fn query_entities(
            &self,
            _request: QueryEntitiesRequest,
            _ctx: &AuthContext,
        ) -> Result<QueryEntitiesPage, CatalogError> {
            Ok(QueryEntitiesPage::default())
        }
    }

    fn state_with(tmp: &NamedTempFile, catalog: Arc<dyn CatalogApi>) -> AppState {
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        store
            .append(&[MetricValueRecord {
                entity_ref: "component:default/secret".to_string(),
                metric_id: HAS_DESCRIPTION.to_string(),
                value: Some(0.0),
                timestamp: Utc::now(),
                status: Some(MetricStatus::Error),
                ..Default::default()
            }])
            .unwrap();

        let mut registry = MetricProviderRegistry::new();
        registry.register(Arc::new(CatalogCompletenessProvider)).unwrap();
        let service = MetricService::new(Arc::new(registry), store, catalog, Arc::new(AllowAllPermissions));
        AppState {
            config: ServerConfig::default(),
            service: Arc::new(service),
        }
    }

    #[tokio::test]
    async fn test_aggregation_ignores_unreadable_entities() {
        let tmp = NamedTempFile::new().unwrap();
        let state = state_with(&tmp, Arc::new(EmptyView));

        let query = AggregationQuery {
            entity_refs: Some("component:default/secret".to_string()),
        };
        let Json(result) = handle_get_aggregation(
            State(state),
            HeaderMap::new(),
            Path(HAS_DESCRIPTION.to_string()),
            Ok(Query(query)),
        )
        .await
        .unwrap();

        assert_eq!(result.result.total, 0);
        assert!(result.result.values.iter().all(|v| v.count == 0));
    }

    #[tokio::test]
    async fn test_aggregation_counts_readable_entities() {
        let tmp = NamedTempFile::new().unwrap();
        let entity: Entity = serde_json::from_str(
            r#"{"kind":"Component","metadata":{"name":"secret"},"spec":{}}"#,
        )
        .unwrap();
        let state = state_with(&tmp, Arc::new(crate::catalog::InMemoryCatalog::new(vec![entity])));

        let query = AggregationQuery {
            entity_refs: Some("Component:default/secret".to_string()),
        };
        let Json(result) = handle_get_aggregation(
            State(state),
            HeaderMap::new(),
            Path(HAS_DESCRIPTION.to_string()),
            Ok(Query(query)),
        )
        .await
        .unwrap();

        assert_eq!(result.result.total, 1);
    }

    #[test]
    fn test_query_rejection_is_input_error() {
        let uri: Uri = "/api/metrics?datasource=a&datasource=b".parse().unwrap();
        let err = query_params(Query::<MetricsQuery>::try_from_uri(&uri)).unwrap_err();
        assert!(matches!(err, ScorecardError::Input(_)));
        assert!(err.to_string().starts_with("Invalid query parameters: "));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_repeated_owner_reaches_drill_down_options() {
        let uri: Uri = "/api/metrics/x/entities?owner=team:default/a&owner=team:default/b"
            .parse()
            .unwrap();
        let pairs = query_params(Query::<Vec<(String, String)>>::try_from_uri(&uri)).unwrap();
        let options = DrillDownParams::from_pairs(pairs).unwrap().into_options().unwrap();
        assert_eq!(
            options.filters.entity_owners,
            vec!["team:default/a".to_string(), "team:default/b".to_string()]
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(None), None);
        assert_eq!(split_list(Some(" , ")), None);
        assert_eq!(
            split_list(Some("github.openPrs, jira.openIssues,")),
            Some(vec!["github.openPrs".to_string(), "jira.openIssues".to_string()])
        );
    }

    #[test]
    fn test_auth_context() {
        let ctx = auth_context(&HeaderMap::new());
        assert_eq!(ctx.principal, GUEST_USER);
        assert!(ctx.token.is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        headers.insert(USER_HEADER, HeaderValue::from_static("user:default/alice"));
        let ctx = auth_context(&headers);
        assert_eq!(ctx.principal, "user:default/alice");
        assert_eq!(ctx.token.as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert!(auth_context(&headers).token.is_none());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ScorecardError::not_found("x"), StatusCode::NOT_FOUND),
            (ScorecardError::Conflict("x".to_string()), StatusCode::CONFLICT),
            (ScorecardError::validation("x"), StatusCode::BAD_REQUEST),
            (ScorecardError::input("x"), StatusCode::BAD_REQUEST),
            (ScorecardError::NotAllowed("x".to_string()), StatusCode::FORBIDDEN),
            (ScorecardError::Database(DbError::Poisoned), StatusCode::INTERNAL_SERVER_ERROR),
            (ScorecardError::Collaborator("x".to_string()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_history_limit() {
        assert_eq!(parse_history_limit(None).unwrap(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(parse_history_limit(Some("25")).unwrap(), 25);
        assert!(parse_history_limit(Some("0")).is_err());
        assert!(parse_history_limit(Some("1001")).is_err());
    }

    #[test]
    fn test_path_entity_ref() {
        assert_eq!(
            path_entity_ref("Component", "default", "checkout").unwrap(),
            "component:default/checkout"
        );
    }
}
