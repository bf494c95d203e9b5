//! Entity change listeners.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use entidb_core::{ChangeOperation, Entity, Value};

/// A committed-to-storage change of one row, or of a whole repository for
/// [`ChangeOperation::DeleteAll`].
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub operation: ChangeOperation,
    pub entity_type: String,
    pub id: Option<Value>,
    /// Row after an add or update.
    pub entity: Option<Entity>,
}

/// Callback for row changes of one entity type.
pub trait EntityListener: Send + Sync {
    fn on_event(&self, event: &EntityEvent);
}

struct Registration {
    id_key: Option<String>,
    listener: Arc<dyn EntityListener>,
}

/// Listeners keyed by entity type, optionally narrowed to a single row.
#[derive(Default)]
pub struct EntityListeners {
    registrations: RwLock<HashMap<String, Vec<Registration>>>,
}

impl EntityListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens to every row of `entity_type`.
    pub fn add(&self, entity_type: impl Into<String>, listener: Arc<dyn EntityListener>) {
        self.register(entity_type.into(), None, listener);
    }

    /// Listens to the row of `entity_type` whose id key is `id_key`.
    pub fn add_for_row(
        &self,
        entity_type: impl Into<String>,
        id_key: impl Into<String>,
        listener: Arc<dyn EntityListener>,
    ) {
        self.register(entity_type.into(), Some(id_key.into()), listener);
    }

    fn register(&self, entity_type: String, id_key: Option<String>, listener: Arc<dyn EntityListener>) {
        self.registrations
            .write()
            .entry(entity_type)
            .or_default()
            .push(Registration { id_key, listener });
    }

    /// Removes every listener of `entity_type`.
    pub fn remove_all(&self, entity_type: &str) {
        self.registrations.write().remove(entity_type);
    }

    #[must_use]
    pub fn has_listeners(&self, entity_type: &str) -> bool {
        self.registrations
            .read()
            .get(entity_type)
            .is_some_and(|registrations| !registrations.is_empty())
    }

    /// Delivers `event` to the matching listeners.
    pub fn notify(&self, event: &EntityEvent) {
        let key = event.id.as_ref().and_then(Value::key);
        let listeners: Vec<Arc<dyn EntityListener>> = self
            .registrations
            .read()
            .get(&event.entity_type)
            .into_iter()
            .flatten()
            .filter(|registration| match (&registration.id_key, &key) {
                (None, _) => true,
                (Some(wanted), Some(key)) => wanted == key,
                // Whole-repository events reach row listeners too.
                (Some(_), None) => true,
            })
            .map(|registration| registration.listener.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: RwLock<Vec<(ChangeOperation, Option<Value>)>>,
    }

    impl EntityListener for Recorder {
        fn on_event(&self, event: &EntityEvent) {
            self.seen.write().push((event.operation, event.id.clone()));
        }
    }

    fn event(operation: ChangeOperation, id: Option<&str>) -> EntityEvent {
        EntityEvent {
            operation,
            entity_type: "demo".to_string(),
            id: id.map(Value::from),
            entity: None,
        }
    }

    #[test]
    fn row_listeners_only_see_their_row() {
        let listeners = EntityListeners::new();
        let all = Arc::new(Recorder::default());
        let one = Arc::new(Recorder::default());
        listeners.add("demo", all.clone());
        listeners.add_for_row("demo", "b", one.clone());

        listeners.notify(&event(ChangeOperation::Update, Some("a")));
        listeners.notify(&event(ChangeOperation::Update, Some("b")));
        listeners.notify(&event(ChangeOperation::DeleteAll, None));

        assert_eq!(all.seen.read().len(), 3);
        assert_eq!(
            *one.seen.read(),
            vec![
                (ChangeOperation::Update, Some(Value::from("b"))),
                (ChangeOperation::DeleteAll, None)
            ]
        );
    }

    #[test]
    fn remove_all_unregisters() {
        let listeners = EntityListeners::new();
        listeners.add("demo", Arc::new(Recorder::default()));
        assert!(listeners.has_listeners("demo"));
        listeners.remove_all("demo");
        assert!(!listeners.has_listeners("demo"));
    }
}
