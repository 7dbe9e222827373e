//! Entity catalog model and the collaborator interface used to read it.
//!
//! The catalog itself lives outside this service. Everything here is either
//! the data shape it returns or the trait the service consumes it through.

mod filter;
mod memory;

pub use filter::*;
pub use memory::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::error::ScorecardError;
use crate::permission::AuthContext;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Catalog collaborator error types.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<CatalogError> for ScorecardError {
    fn from(value: CatalogError) -> Self {
        Self::Collaborator(value.to_string())
    }
}

/// A cataloged object such as a component, API or system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Entity {
    /// Stringified `kind:namespace/name` reference.
    pub fn entity_ref(&self) -> String {
        EntityRef {
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
        .to_string()
    }

    /// Title when set, otherwise the bare name.
    pub fn display_name(&self) -> String {
        self.metadata
            .title
            .clone()
            .unwrap_or_else(|| self.metadata.name.clone())
    }

    /// Owner as a full entity reference. Bare owners default to groups.
    pub fn owner_ref(&self) -> Option<String> {
        let owner = self.spec.get("owner")?.as_str()?;
        EntityRef::parse_with_defaults(owner, Some("group"), &self.metadata.namespace)
            .ok()
            .map(|r| r.to_string())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Keep only the requested fields. Identity fields are always kept.
    pub fn project(&self, fields: &[&str]) -> Entity {
        if fields.is_empty() {
            return self.clone();
        }
        let wants = |field: &str| {
            fields
                .iter()
                .any(|f| *f == field || field.starts_with(&format!("{}.", f)))
        };

        let mut spec = serde_json::Value::Null;
        if wants("spec") {
            spec = self.spec.clone();
        } else if wants("spec.owner") {
            if let Some(owner) = self.spec.get("owner") {
                spec = serde_json::json!({ "owner": owner });
            }
        }

        Entity {
            kind: self.kind.clone(),
            metadata: EntityMetadata {
                name: self.metadata.name.clone(),
                namespace: self.metadata.namespace.clone(),
                title: if wants("metadata.title") { self.metadata.title.clone() } else { None },
                description: if wants("metadata.description") {
                    self.metadata.description.clone()
                } else {
                    None
                },
                annotations: if wants("metadata.annotations") {
                    self.metadata.annotations.clone()
                } else {
                    BTreeMap::new()
                },
                tags: if wants("metadata.tags") { self.metadata.tags.clone() } else { Vec::new() },
            },
            spec,
        }
    }
}

/// Parsed form of a `kind:namespace/name` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl EntityRef {
    /// Parse a fully qualified reference. Namespace may be omitted.
    pub fn parse(input: &str) -> Result<Self, ScorecardError> {
        Self::parse_with_defaults(input, None, DEFAULT_NAMESPACE)
    }

    pub fn parse_with_defaults(
        input: &str,
        default_kind: Option<&str>,
        default_namespace: &str,
    ) -> Result<Self, ScorecardError> {
        let input = input.trim();
        let (kind, rest) = match input.split_once(':') {
            Some((kind, rest)) => (Some(kind), rest),
            None => (default_kind, input),
        };
        let (namespace, name) = match rest.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (default_namespace, rest),
        };

        let kind = kind.ok_or_else(|| {
            ScorecardError::input(format!("entity reference '{}' is missing a kind", input))
        })?;
        if kind.is_empty() || namespace.is_empty() || name.is_empty() || name.contains(['/', ':']) {
            return Err(ScorecardError::input(format!(
                "malformed entity reference '{}'",
                input
            )));
        }

        Ok(Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.kind.to_lowercase(),
            self.namespace.to_lowercase(),
            self.name
        )
    }
}

/// Request for one page of catalog entities.
#[derive(Debug, Clone, Default)]
pub struct QueryEntitiesRequest {
    pub limit: usize,
    pub cursor: Option<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryEntitiesPage {
    pub items: Vec<Entity>,
    pub next_cursor: Option<String>,
}

/// Read access to the entity catalog on behalf of a caller.
///
/// Entities the caller may not read are indistinguishable from missing
/// ones: they are simply absent from the response.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_entity_by_ref(
        &self,
        entity_ref: &str,
        ctx: &AuthContext,
    ) -> Result<Option<Entity>, CatalogError>;

    /// Batch lookup. The result has one slot per requested ref, in order.
    async fn get_entities_by_refs(
        &self,
        entity_refs: &[String],
        fields: &[&str],
        ctx: &AuthContext,
    ) -> Result<Vec<Option<Entity>>, CatalogError>;

    async fn query_entities(
        &self,
        request: QueryEntitiesRequest,
        ctx: &AuthContext,
    ) -> Result<QueryEntitiesPage, CatalogError>;
}
