//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names consistent across log lines and errors.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_GROUP_ID: &str = "group_id";
pub const FIELD_COMPUTER_ID: &str = "computer_id";
pub const FIELD_OPTION: &str = "option";

// Collection sizes
pub const FIELD_ROW_COUNT: &str = "row_count";
pub const FIELD_MEMBER_COUNT: &str = "member_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_SKIPPED: &str = "skipped";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_distinct() {
        let events = [EVENT_START, EVENT_END, EVENT_END_ERROR, EVENT_SKIPPED];
        for (i, a) in events.iter().enumerate() {
            for b in &events[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_entity_fields_non_empty() {
        assert!(!FIELD_ENTITY_ID.is_empty());
        assert!(!FIELD_GROUP_ID.is_empty());
        assert!(!FIELD_COMPUTER_ID.is_empty());
    }
}
