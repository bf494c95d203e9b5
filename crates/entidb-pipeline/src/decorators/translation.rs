//! Maps backend-native failures onto the shared error categories and counts
//! repository operations.

use async_trait::async_trait;

use entidb_core::metrics::{status_label, REPOSITORY_OPERATIONS};
use entidb_core::{
    BackendErrorCode, CoreError, CoreResult, Entity, Fetch, Query, Repository, Value,
};

use crate::decorator::RepositoryDecorator;

pub struct ExceptionTranslationDecorator;

/// Translates a [`CoreError::Backend`] failure; other errors pass unchanged.
#[must_use]
pub fn translate(entity_type: &str, err: CoreError) -> CoreError {
    let failure = match err {
        CoreError::Backend(failure) => failure,
        other => return other,
    };
    match failure.code {
        BackendErrorCode::UniqueViolation => {
            CoreError::already_exists("entity", format!("{entity_type}: {}", failure.message))
        }
        BackendErrorCode::MissingTable => CoreError::not_found("repository", entity_type),
        BackendErrorCode::NotNullViolation | BackendErrorCode::ForeignKeyViolation => {
            CoreError::validation(format!("{entity_type}: {}", failure.message))
        }
        BackendErrorCode::Other => CoreError::StorageError(failure.message),
    }
}

fn observe<T>(next: &dyn Repository, operation: &str, result: CoreResult<T>) -> CoreResult<T> {
    REPOSITORY_OPERATIONS
        .with_label_values(&[next.name(), operation, status_label(&result)])
        .inc();
    result.map_err(|err| translate(next.name(), err))
}

#[async_trait]
impl RepositoryDecorator for ExceptionTranslationDecorator {
    fn name(&self) -> &'static str {
        "exception-translation"
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        observe(next, "count", next.count(query).await)
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        observe(next, "find_all", next.find_all(query).await)
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        observe(next, "find_one_by_id", next.find_one_by_id(id, fetch).await)
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        observe(next, "add", next.add_all(entities).await)
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        observe(next, "update", next.update_all(entities).await)
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        observe(next, "delete", next.delete_all_by_id(ids).await)
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        observe(next, "delete_all", next.delete_all().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::BackendFailure;

    fn backend(code: BackendErrorCode) -> CoreError {
        BackendFailure::new("sqlite", code, "constraint failed").into()
    }

    #[test]
    fn backend_codes_map_to_categories() {
        assert!(matches!(
            translate("demo", backend(BackendErrorCode::UniqueViolation)),
            CoreError::AlreadyExists { .. }
        ));
        assert!(translate("demo", backend(BackendErrorCode::MissingTable)).is_not_found());
        assert!(matches!(
            translate("demo", backend(BackendErrorCode::NotNullViolation)),
            CoreError::ValidationError(_)
        ));
        assert!(matches!(
            translate("demo", backend(BackendErrorCode::ForeignKeyViolation)),
            CoreError::ValidationError(_)
        ));
        match translate("demo", backend(BackendErrorCode::Other)) {
            CoreError::StorageError(message) => assert_eq!(message, "constraint failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_errors_pass_through() {
        let err = translate("demo", CoreError::unknown_entity_type("demo"));
        assert!(matches!(err, CoreError::UnknownEntityType { .. }));
    }
}
