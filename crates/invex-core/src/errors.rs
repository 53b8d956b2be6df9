use invex_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using the canonical error facility
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers (HTTP layer, CLI,
/// tests) can match on without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Validation
    InvalidInput,
    UnknownField,
    InvalidOperator,
    InvalidArgument,
    NotFound,

    /// Stored configuration (e.g. a group predicate) cannot be evaluated
    Configuration,

    // Integration/IO
    Io,
    Serialization,
    Persistence,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::UnknownField => "ERR_UNKNOWN_FIELD",
            ExErrorKind::InvalidOperator => "ERR_INVALID_OPERATOR",
            ExErrorKind::InvalidArgument => "ERR_INVALID_ARGUMENT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Validation failures are caller mistakes and are never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExErrorKind::InvalidInput
                | ExErrorKind::UnknownField
                | ExErrorKind::InvalidOperator
                | ExErrorKind::InvalidArgument
        )
    }
}

/// Canonical structured error type
///
/// Carries a classification kind plus optional context for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_id: Option<i64>,
    field: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_id: None,
            field: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity (computer or group) id context
    pub fn with_entity_id(mut self, id: i64) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Add logical field name context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_id(&self) -> Option<i64> {
        self.entity_id
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field: {})", field)?;
        }
        if let Some(entity_id) = self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request_id: {})", request_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Validation failures raised while resolving fields and composing queries
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Entity prefix of a dotted field reference is not registered
    #[error("Unknown entity '{entity}' in field reference '{reference}'")]
    UnknownEntity { entity: String, reference: String },

    /// Field is not part of the entity's schema descriptor
    #[error("Unknown field '{reference}'")]
    UnknownField { reference: String },

    /// Operator is not valid for the field's datatype
    #[error("Invalid operator '{operator}' for {field_type} field '{field}'")]
    InvalidOperator {
        field: String,
        operator: String,
        field_type: String,
    },

    /// Filter argument cannot be interpreted for the field's datatype
    #[error("Invalid argument '{value}' for {field_type} field '{field}'")]
    InvalidArgument {
        field: String,
        value: String,
        field_type: String,
    },

    /// Sort direction is neither asc nor desc
    #[error("Invalid sort direction '{direction}'")]
    InvalidDirection { direction: String },

    /// Custom field column is not a plain SQL identifier
    #[error("Invalid column name '{column}'")]
    InvalidColumn { column: String },
}

impl From<QueryError> for ExError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::UnknownEntity { reference, .. } | QueryError::UnknownField { reference } => {
                ExError::new(ExErrorKind::UnknownField)
                    .with_op("resolve_field")
                    .with_field(reference)
                    .with_message(message)
            }
            QueryError::InvalidOperator { field, .. } => {
                ExError::new(ExErrorKind::InvalidOperator)
                    .with_op("compose")
                    .with_field(field)
                    .with_message(message)
            }
            QueryError::InvalidArgument { field, .. } => {
                ExError::new(ExErrorKind::InvalidArgument)
                    .with_op("compose")
                    .with_field(field)
                    .with_message(message)
            }
            QueryError::InvalidDirection { .. } => ExError::new(ExErrorKind::InvalidArgument)
                .with_op("compose")
                .with_message(message),
            QueryError::InvalidColumn { column } => ExError::new(ExErrorKind::InvalidInput)
                .with_op("register_custom_field")
                .with_field(column)
                .with_message(message),
        }
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes_are_stable() {
        let cases = [
            (ExErrorKind::UnknownField, "ERR_UNKNOWN_FIELD"),
            (ExErrorKind::InvalidOperator, "ERR_INVALID_OPERATOR"),
            (ExErrorKind::InvalidArgument, "ERR_INVALID_ARGUMENT"),
            (ExErrorKind::Configuration, "ERR_CONFIGURATION"),
            (ExErrorKind::Persistence, "ERR_PERSISTENCE"),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_query_error_maps_to_validation_kind() {
        let err: ExError = QueryError::InvalidArgument {
            field: "CpuCores".into(),
            value: "many".into(),
            field_type: "integer".into(),
        }
        .into();
        assert_eq!(err.kind(), ExErrorKind::InvalidArgument);
        assert!(err.kind().is_validation());
        assert_eq!(err.field(), Some("CpuCores"));
        assert!(err.message().contains("many"));
    }

    #[test]
    fn test_display_includes_context() {
        let err = ExError::new(ExErrorKind::NotFound)
            .with_op("get_group")
            .with_entity_id(7)
            .with_message("group not found");
        let text = err.to_string();
        assert!(text.starts_with("[ERR_NOT_FOUND]"));
        assert!(text.contains("get_group"));
        assert!(text.contains("entity_id: 7"));
    }

    #[test]
    fn test_source_chain() {
        let inner = ExError::new(ExErrorKind::Persistence).with_message("disk full");
        let outer = ExError::new(ExErrorKind::Configuration).with_source(inner);
        assert_eq!(
            outer.source_error().map(|e| e.kind()),
            Some(ExErrorKind::Persistence)
        );
        assert!(std::error::Error::source(&outer).is_some());
    }
}
