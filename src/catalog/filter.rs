//! Entity selection predicates used by providers to declare applicability.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::Entity;

/// A disjunction of clauses; each clause is a conjunction of
/// `attribute path -> accepted values` constraints.
///
/// An empty filter matches every entity. An empty value list matches any
/// entity where the attribute exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogFilter(pub Vec<BTreeMap<String, Vec<String>>>);

impl CatalogFilter {
    pub fn any() -> Self {
        Self::default()
    }

    /// Single-clause filter on one attribute.
    pub fn with(path: &str, values: &[&str]) -> Self {
        Self(vec![clause(path, values)])
    }

    /// Add a constraint to the last clause.
    #[cfg(test)]
    pub fn and(mut self, path: &str, values: &[&str]) -> Self {
        match self.0.last_mut() {
            Some(last) => {
                last.insert(path.to_string(), values.iter().map(|v| v.to_string()).collect());
            }
            None => self.0.push(clause(path, values)),
        }
        self
    }

    /// Start a new alternative clause.
    #[cfg(test)]
    pub fn or(mut self, path: &str, values: &[&str]) -> Self {
        self.0.push(clause(path, values));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let doc = match serde_json::to_value(entity) {
            Ok(doc) => doc,
            Err(_) => return false,
        };

        self.0.iter().any(|clause| {
            clause
                .iter()
                .all(|(path, accepted)| attribute_matches(&doc, path, accepted))
        })
    }
}

fn clause(path: &str, values: &[&str]) -> BTreeMap<String, Vec<String>> {
    let mut clause = BTreeMap::new();
    clause.insert(path.to_string(), values.iter().map(|v| v.to_string()).collect());
    clause
}

fn attribute_matches(doc: &Value, path: &str, accepted: &[String]) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let Some(found) = lookup(doc, &segments) else {
        return false;
    };
    if accepted.is_empty() {
        return !found.is_null();
    }

    let actual = leaf_strings(found);
    accepted
        .iter()
        .any(|want| actual.iter().any(|have| have.eq_ignore_ascii_case(want)))
}

/// Walk a dotted path. Object keys may themselves contain dots
/// (annotation keys usually do), so the longest matching key wins.
fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let object = value.as_object()?;
    for take in (1..=path.len()).rev() {
        let key = path[..take].join(".");
        if let Some(child) = object.get(&key) {
            if let Some(found) = lookup(child, &path[take..]) {
                return Some(found);
            }
        }
    }
    None
}

fn leaf_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(leaf_strings).collect(),
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::Null | Value::Object(_) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityMetadata;

    fn entity() -> Entity {
        let mut annotations = BTreeMap::new();
        annotations.insert("github.com/project-slug".to_string(), "acme/checkout".to_string());
        Entity {
            kind: "Component".to_string(),
            metadata: EntityMetadata {
                name: "checkout".to_string(),
                namespace: "default".to_string(),
                title: None,
                description: None,
                annotations,
                tags: vec!["java".to_string(), "payments".to_string()],
            },
            spec: serde_json::json!({ "type": "service", "owner": "platform" }),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(CatalogFilter::any().matches(&entity()));
    }

    #[test]
    fn test_clause_is_conjunction() {
        let filter = CatalogFilter::with("kind", &["component"]).and("spec.type", &["service"]);
        assert!(filter.matches(&entity()));

        let filter = CatalogFilter::with("kind", &["component"]).and("spec.type", &["website"]);
        assert!(!filter.matches(&entity()));
    }

    #[test]
    fn test_clauses_are_disjunction() {
        let filter = CatalogFilter::with("kind", &["API"]).or("metadata.tags", &["payments"]);
        assert!(filter.matches(&entity()));
    }

    #[test]
    fn test_dotted_annotation_keys() {
        let filter = CatalogFilter::with("metadata.annotations.github.com/project-slug", &[]);
        assert!(filter.matches(&entity()));

        let filter = CatalogFilter::with("metadata.annotations.gitlab.com/project-slug", &[]);
        assert!(!filter.matches(&entity()));
    }
}
