use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::decorator::RepositoryDecorator;

/// Application-supplied decorators, keyed by entity type name.
///
/// They form the outermost stage; for one entity type the decorator
/// registered first ends up outermost.
#[derive(Default)]
pub struct CustomDecoratorRegistry {
    decorators: RwLock<HashMap<String, Vec<Arc<dyn RepositoryDecorator>>>>,
}

impl CustomDecoratorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity_type: impl Into<String>, decorator: Arc<dyn RepositoryDecorator>) {
        let entity_type = entity_type.into();
        debug!("Registered custom decorator {} for {}", decorator.name(), entity_type);
        self.decorators
            .write()
            .entry(entity_type)
            .or_default()
            .push(decorator);
    }

    #[must_use]
    pub fn decorators_for(&self, entity_type: &str) -> Vec<Arc<dyn RepositoryDecorator>> {
        self.decorators
            .read()
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove_all(&self, entity_type: &str) {
        self.decorators.write().remove(entity_type);
    }
}
