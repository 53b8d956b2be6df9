//! Error handling for invex-store
//!
//! Wraps invex-core ExError with store-specific helpers

use invex_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// A group's stored predicate cannot be evaluated
pub fn predicate_error(group_id: i64, reason: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::Configuration)
        .with_op("evaluate_predicate")
        .with_entity_id(group_id)
        .with_message(reason)
}

/// Create a not-found error for a computer or group id
pub fn not_found(op: &str, entity_id: i64) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_op(op)
        .with_entity_id(entity_id)
        .with_message(format!("Entity {} not found", entity_id))
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// The statement failed on a UNIQUE or PRIMARY KEY constraint
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
