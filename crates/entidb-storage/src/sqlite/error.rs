use entidb_core::{BackendErrorCode, BackendFailure, CoreError};

/// Classifies a sqlx failure by the SQLite message it carries.
pub(crate) fn map_sqlx_error(backend: &str, err: sqlx::Error) -> CoreError {
    let (code, message) = match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            let code = if message.contains("UNIQUE constraint failed") {
                BackendErrorCode::UniqueViolation
            } else if message.contains("NOT NULL constraint failed") {
                BackendErrorCode::NotNullViolation
            } else if message.contains("FOREIGN KEY constraint failed") {
                BackendErrorCode::ForeignKeyViolation
            } else if message.contains("no such table") {
                BackendErrorCode::MissingTable
            } else {
                BackendErrorCode::Other
            };
            (code, message)
        }
        other => (BackendErrorCode::Other, other.to_string()),
    };
    BackendFailure::new(backend, code, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_unclassified() {
        let err = map_sqlx_error("sqlite", sqlx::Error::RowNotFound);
        assert!(matches!(
            err,
            CoreError::Backend(BackendFailure { code: BackendErrorCode::Other, .. })
        ));
    }
}
