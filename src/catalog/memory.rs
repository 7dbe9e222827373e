//! In-process catalog backed by a JSON file of entities.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use super::{CatalogApi, CatalogError, Entity, QueryEntitiesPage, QueryEntitiesRequest};
use crate::permission::AuthContext;

/// A read-only catalog holding every entity in memory, keyed by ref.
///
/// Every caller sees every entity; per-entity authorization belongs to the
/// real catalog this stands in for.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entities: BTreeMap<String, Entity>,
}

impl InMemoryCatalog {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.entity_ref(), e)).collect(),
        }
    }

    /// Load a JSON array of entities.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let entities: Vec<Entity> = serde_json::from_str(&raw)?;
        Ok(Self::new(entities))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }
}

#[async_trait]
impl CatalogApi for InMemoryCatalog {
    async fn get_entity_by_ref(
        &self,
        entity_ref: &str,
        _ctx: &AuthContext,
    ) -> Result<Option<Entity>, CatalogError> {
        Ok(self.entities.get(entity_ref).cloned())
    }

    async fn get_entities_by_refs(
        &self,
        entity_refs: &[String],
        fields: &[&str],
        _ctx: &AuthContext,
    ) -> Result<Vec<Option<Entity>>, CatalogError> {
        Ok(entity_refs
            .iter()
            .map(|r| self.entities.get(r).map(|e| e.project(fields)))
            .collect())
    }

    async fn query_entities(
        &self,
        request: QueryEntitiesRequest,
        _ctx: &AuthContext,
    ) -> Result<QueryEntitiesPage, CatalogError> {
        let offset = match request.cursor.as_deref() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| CatalogError::Unavailable(format!("invalid cursor '{}'", cursor)))?,
            None => 0,
        };
        let limit = request.limit.max(1);
        let fields: Vec<&str> = request.fields.iter().map(String::as_str).collect();

        let items: Vec<Entity> = self
            .entities
            .values()
            .skip(offset)
            .take(limit)
            .map(|e| e.project(&fields))
            .collect();
        let next = offset + items.len();
        let next_cursor = if next < self.entities.len() {
            Some(next.to_string())
        } else {
            None
        };

        Ok(QueryEntitiesPage { items, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"[{{"kind":"Component","metadata":{{"name":"checkout"}},"spec":{{"owner":"platform"}}}},
               {{"kind":"API","metadata":{{"name":"payments","namespace":"billing"}}}}]"#
        )
        .unwrap();

        let catalog = InMemoryCatalog::load(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let ctx = AuthContext::user("user:default/tester", None);
        let found = tokio_test::block_on(catalog.get_entity_by_ref("api:billing/payments", &ctx)).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_batch_lookup_preserves_order_and_gaps() {
        let catalog: InMemoryCatalog = serde_json::from_str::<Vec<Entity>>(
            r#"[{"kind":"Component","metadata":{"name":"a"}},{"kind":"Component","metadata":{"name":"b"}}]"#,
        )
        .map(InMemoryCatalog::new)
        .unwrap();

        let refs = vec![
            "component:default/b".to_string(),
            "component:default/missing".to_string(),
            "component:default/a".to_string(),
        ];
        let ctx = AuthContext::user("user:default/tester", None);
        let found = tokio_test::block_on(catalog.get_entities_by_refs(&refs, &[], &ctx)).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].as_ref().unwrap().metadata.name, "b");
        assert!(found[1].is_none());
        assert_eq!(found[2].as_ref().unwrap().metadata.name, "a");
    }
}
