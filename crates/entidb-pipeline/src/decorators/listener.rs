use std::sync::Arc;

use async_trait::async_trait;

use entidb_core::{ChangeOperation, CoreResult, Entity, Repository, Value};

use crate::decorator::RepositoryDecorator;
use crate::listeners::{EntityEvent, EntityListeners};

/// Notifies [`EntityListeners`] after each successful write.
pub struct ChangeNotificationDecorator {
    listeners: Arc<EntityListeners>,
}

impl ChangeNotificationDecorator {
    pub fn new(listeners: Arc<EntityListeners>) -> Self {
        Self { listeners }
    }

    fn notify_rows(&self, next: &dyn Repository, operation: ChangeOperation, entities: &[Entity]) {
        if !self.listeners.has_listeners(next.name()) {
            return;
        }
        for entity in entities {
            self.listeners.notify(&EntityEvent {
                operation,
                entity_type: next.name().to_string(),
                id: entity.id().cloned(),
                entity: Some(entity.clone()),
            });
        }
    }
}

#[async_trait]
impl RepositoryDecorator for ChangeNotificationDecorator {
    fn name(&self) -> &'static str {
        "change-notification"
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        let added = next.add_all(entities).await?;
        self.notify_rows(next, ChangeOperation::Add, entities);
        Ok(added)
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        next.update_all(entities).await?;
        self.notify_rows(next, ChangeOperation::Update, entities);
        Ok(())
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        next.delete_all_by_id(ids).await?;
        if self.listeners.has_listeners(next.name()) {
            for id in ids {
                self.listeners.notify(&EntityEvent {
                    operation: ChangeOperation::Delete,
                    entity_type: next.name().to_string(),
                    id: Some(id.clone()),
                    entity: None,
                });
            }
        }
        Ok(())
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        next.delete_all().await?;
        self.listeners.notify(&EntityEvent {
            operation: ChangeOperation::DeleteAll,
            entity_type: next.name().to_string(),
            id: None,
            entity: None,
        });
        Ok(())
    }
}
