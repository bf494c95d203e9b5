//! In-memory full-text search index.
//!
//! One mapping per entity type holds an inverted index
//! `token -> document keys` plus the tokens of each document, so a document
//! can be replaced or removed without scanning every posting list. A search
//! matches documents that contain every query token, either exactly or as a
//! prefix of a document token.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use entidb_core::{CoreError, CoreResult, Entity, EntityType, SearchIndex, Value};

#[derive(Default)]
struct Mapping {
    postings: BTreeMap<String, BTreeSet<String>>,
    documents: HashMap<String, Document>,
}

struct Document {
    id: Value,
    tokens: BTreeSet<String>,
}

impl Mapping {
    fn remove(&mut self, key: &str) {
        let Some(document) = self.documents.remove(key) else {
            return;
        };
        for token in document.tokens {
            let now_empty = match self.postings.get_mut(&token) {
                Some(keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.postings.remove(&token);
            }
        }
    }

    fn insert(&mut self, key: String, id: Value, tokens: BTreeSet<String>) {
        self.remove(&key);
        for token in &tokens {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(key.clone());
        }
        self.documents.insert(key, Document { id, tokens });
    }

    /// Keys of documents holding a token that starts with `prefix`.
    fn matching(&self, prefix: &str) -> BTreeSet<String> {
        self.postings
            .range(prefix.to_string()..)
            .take_while(|(token, _)| token.starts_with(prefix))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn document_tokens(entity: &Entity) -> BTreeSet<String> {
    entity
        .entity_type()
        .atomic_attributes()
        .into_iter()
        .filter(|attribute| attribute.data_type.is_string_like())
        .filter_map(|attribute| entity.get(&attribute.name).as_str())
        .flat_map(tokenize)
        .collect()
}

/// Search index kept in process memory.
#[derive(Default)]
pub struct MemorySearchIndex {
    mappings: RwLock<HashMap<String, Mapping>>,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents for `entity_type`.
    #[must_use]
    pub fn document_count(&self, entity_type: &str) -> usize {
        self.mappings
            .read()
            .get(entity_type)
            .map_or(0, |mapping| mapping.documents.len())
    }

    fn missing_mapping(entity_type: &str) -> CoreError {
        CoreError::not_found("search mapping", entity_type)
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn create_mapping(&self, entity_type: &EntityType) -> CoreResult<()> {
        let mut mappings = self.mappings.write();
        if mappings.contains_key(&entity_type.name) {
            return Err(CoreError::already_exists("search mapping", &entity_type.name));
        }
        mappings.insert(entity_type.name.clone(), Mapping::default());
        debug!("Created search mapping for {}", entity_type.name);
        Ok(())
    }

    async fn has_mapping(&self, entity_type: &EntityType) -> CoreResult<bool> {
        Ok(self.mappings.read().contains_key(&entity_type.name))
    }

    async fn delete_mapping(&self, entity_type: &EntityType) -> CoreResult<()> {
        match self.mappings.write().remove(&entity_type.name) {
            Some(_) => {
                debug!("Deleted search mapping for {}", entity_type.name);
                Ok(())
            }
            None => Err(Self::missing_mapping(&entity_type.name)),
        }
    }

    async fn index(&self, entity: &Entity) -> CoreResult<()> {
        let id = entity
            .id()
            .cloned()
            .ok_or_else(|| CoreError::validation("cannot index an entity without id"))?;
        let key = id.require_key()?;
        let tokens = document_tokens(entity);
        let mut mappings = self.mappings.write();
        let mapping = mappings
            .get_mut(entity.entity_type_name())
            .ok_or_else(|| Self::missing_mapping(entity.entity_type_name()))?;
        mapping.insert(key, id, tokens);
        Ok(())
    }

    async fn delete(&self, entity_type: &EntityType, id: &Value) -> CoreResult<()> {
        let key = id.require_key()?;
        let mut mappings = self.mappings.write();
        let mapping = mappings
            .get_mut(&entity_type.name)
            .ok_or_else(|| Self::missing_mapping(&entity_type.name))?;
        mapping.remove(&key);
        Ok(())
    }

    async fn delete_all(&self, entity_type: &EntityType) -> CoreResult<()> {
        let mut mappings = self.mappings.write();
        let mapping = mappings
            .get_mut(&entity_type.name)
            .ok_or_else(|| Self::missing_mapping(&entity_type.name))?;
        *mapping = Mapping::default();
        Ok(())
    }

    async fn search(&self, entity_type: &EntityType, text: &str) -> CoreResult<Vec<Value>> {
        let mappings = self.mappings.read();
        let mapping = mappings
            .get(&entity_type.name)
            .ok_or_else(|| Self::missing_mapping(&entity_type.name))?;

        let mut matched: Option<BTreeSet<String>> = None;
        for token in tokenize(text) {
            let keys = mapping.matching(&token);
            matched = Some(match matched {
                Some(previous) => previous.intersection(&keys).cloned().collect(),
                None => keys,
            });
        }
        Ok(matched
            .unwrap_or_default()
            .iter()
            .filter_map(|key| mapping.documents.get(key).map(|doc| doc.id.clone()))
            .collect())
    }
}
