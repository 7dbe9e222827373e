//! Validation of raw drill-down query parameters.

use crate::db::{DetailFilters, DetailSort, MetricStatus, Pagination, SortField, SortOrder};
use crate::error::{ScorecardError, ScorecardResult};
use crate::permission::PermissionCriteria;

pub const MAX_PAGE: u32 = 10_000;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 5;
pub const MAX_OWNERS: usize = 50;

/// Options for one drill-down request, already validated.
#[derive(Debug, Clone, Default)]
pub struct EntityMetricDetailsOptions {
    pub filters: DetailFilters,
    pub sort: DetailSort,
    pub pagination: Pagination,
    pub permission_filter: Option<PermissionCriteria>,
}

/// Drill-down parameters exactly as they arrive on the query string.
#[derive(Debug, Clone, Default)]
pub struct DrillDownParams {
    pub status: Option<String>,
    /// Every `owner` value given; each may itself be a comma-separated list.
    pub owner: Vec<String>,
    pub kind: Option<String>,
    pub entity_name: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl DrillDownParams {
    /// Collect raw `key=value` pairs. `owner` may repeat; any other known
    /// key given twice is rejected. Unknown keys are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> ScorecardResult<Self> {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "owner" => {
                    params.owner.push(value);
                    continue;
                }
                "status" => &mut params.status,
                "kind" => &mut params.kind,
                "entityName" => &mut params.entity_name,
                "sortBy" => &mut params.sort_by,
                "sortOrder" => &mut params.sort_order,
                "page" => &mut params.page,
                "pageSize" => &mut params.page_size,
                _ => continue,
            };
            if slot.is_some() {
                return Err(ScorecardError::input(format!("{} may only be given once", key)));
            }
            *slot = Some(value);
        }
        Ok(params)
    }

    pub fn into_options(self) -> ScorecardResult<EntityMetricDetailsOptions> {
        let status = match non_empty(self.status) {
            Some(raw) => Some(raw.parse::<MetricStatus>().map_err(|_| {
                ScorecardError::input(format!("status must be one of success, warning, error; got '{}'", raw))
            })?),
            None => None,
        };

        let entity_owners: Vec<String> = self
            .owner
            .iter()
            .flat_map(|raw| raw.split(','))
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if entity_owners.len() > MAX_OWNERS {
            return Err(ScorecardError::input(format!(
                "owner accepts at most {} values, got {}",
                MAX_OWNERS,
                entity_owners.len()
            )));
        }

        let field = match non_empty(self.sort_by).as_deref() {
            None => SortField::Timestamp,
            Some("entityName") => SortField::EntityName,
            Some("owner") => SortField::Owner,
            Some("entityKind") => SortField::EntityKind,
            Some("timestamp") => SortField::Timestamp,
            Some("metricValue") => SortField::MetricValue,
            Some(other) => {
                return Err(ScorecardError::input(format!(
                    "sortBy must be one of entityName, owner, entityKind, timestamp, metricValue; got '{}'",
                    other
                )))
            }
        };
        let order = match non_empty(self.sort_order).as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => {
                return Err(ScorecardError::input(format!(
                    "sortOrder must be asc or desc; got '{}'",
                    other
                )))
            }
        };

        let page = parse_bounded("page", self.page, 1, MAX_PAGE, 1)?;
        let page_size = parse_bounded("pageSize", self.page_size, 1, MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE)?;

        Ok(EntityMetricDetailsOptions {
            filters: DetailFilters {
                status,
                entity_kind: non_empty(self.kind),
                entity_owners,
                entity_name: non_empty(self.entity_name),
                entity_refs: Vec::new(),
            },
            sort: DetailSort { field, order },
            pagination: Pagination { page, page_size },
            permission_filter: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bounded(name: &str, raw: Option<String>, min: u32, max: u32, default: u32) -> ScorecardResult<u32> {
    let Some(raw) = non_empty(raw) else {
        return Ok(default);
    };
    match raw.parse::<u32>() {
        Ok(n) if (min..=max).contains(&n) => Ok(n),
        _ => Err(ScorecardError::input(format!(
            "{} must be an integer between {} and {}; got '{}'",
            name, min, max, raw
        ))),
    }
}
