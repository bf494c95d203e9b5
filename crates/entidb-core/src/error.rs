use std::fmt;

use thiserror::Error;

/// Canonical error type for repository and metadata operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity type name does not resolve to a known entity type.
    #[error("unknown entity type `{name}`")]
    UnknownEntityType {
        /// Fully-qualified entity type name.
        name: String,
    },

    /// Attribute name does not resolve within the owning entity type.
    #[error("unknown attribute `{attribute}` of entity type `{entity_type}`")]
    UnknownAttribute {
        /// Owning entity type name.
        entity_type: String,
        /// Attribute name or identifier that failed to resolve.
        attribute: String,
    },

    /// Entity was not found in the metadata store or a repository.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Kind of the missing object (e.g. `"package"`).
        entity: &'static str,
        /// Identifier of the missing object.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Kind of the conflicting object (e.g. `"repository"`).
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// A schema update was structurally disallowed.
    #[error("disallowed schema change on `{entity_type}`: {message}")]
    SchemaChange {
        /// Entity type the change was attempted on.
        entity_type: String,
        /// Human-readable explanation.
        message: String,
    },

    /// Operation requires a capability the target does not advertise.
    #[error("unsupported operation: `{target}` is not {capability}")]
    Unsupported {
        /// Repository or backend name.
        target: String,
        /// Capability that is missing.
        capability: String,
    },

    /// The acting principal lacks the required permission.
    #[error("permission denied: `{principal}` lacks {permission} on `{target}`")]
    PermissionDenied {
        /// Acting principal.
        principal: String,
        /// Required permission.
        permission: String,
        /// Target of the permission check.
        target: String,
    },

    /// Untranslated failure raised by a storage backend.
    #[error("{0}")]
    Backend(BackendFailure),

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Storage backend error that has no more specific category.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates an `UnknownEntityType` variant.
    #[must_use]
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an `UnknownAttribute` variant.
    #[must_use]
    pub fn unknown_attribute(entity_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            entity_type: entity_type.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `SchemaChange` variant.
    #[must_use]
    pub fn schema_change(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaChange {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Creates an `Unsupported` variant.
    #[must_use]
    pub fn unsupported(target: impl Into<String>, capability: impl fmt::Display) -> Self {
        Self::Unsupported {
            target: target.into(),
            capability: capability.to_string(),
        }
    }

    /// Creates a `PermissionDenied` variant.
    #[must_use]
    pub fn permission_denied(
        principal: impl Into<String>,
        permission: impl fmt::Display,
        target: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            principal: principal.into(),
            permission: permission.to_string(),
            target: target.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `ValidationError` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Returns `true` for every not-found category.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownEntityType { .. } | Self::UnknownAttribute { .. } | Self::NotFound { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Classification a backend attaches to a native failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    /// A unique or primary-key constraint was violated.
    UniqueViolation,
    /// A required value was missing.
    NotNullViolation,
    /// A referenced row does not exist.
    ForeignKeyViolation,
    /// The physical table/collection is missing.
    MissingTable,
    /// Anything the backend could not classify.
    Other,
}

/// Raw failure as reported by a storage backend.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendFailure {
    #[must_use]
    pub fn new(backend: impl Into<String>, code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} backend failure ({:?}): {}", self.backend, self.code, self.message)
    }
}

impl From<BackendFailure> for CoreError {
    fn from(failure: BackendFailure) -> Self {
        Self::Backend(failure)
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_family() {
        assert!(CoreError::unknown_entity_type("demo").is_not_found());
        assert!(CoreError::unknown_attribute("demo", "x").is_not_found());
        assert!(CoreError::not_found("package", "base").is_not_found());
        assert!(!CoreError::already_exists("repository", "demo").is_not_found());
    }

    #[test]
    fn backend_failure_message_is_kept() {
        let err: CoreError =
            BackendFailure::new("sqlite", BackendErrorCode::Other, "disk I/O error").into();
        assert!(err.to_string().contains("disk I/O error"));
    }
}
