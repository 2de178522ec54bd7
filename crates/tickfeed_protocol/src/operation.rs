//! Replication log operation codes.

/// Operation type of a replication log entry.
///
/// Codes are fixed by the upstream log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// A multi-statement transaction was opened.
    TxnStart,
    /// A transaction committed; its buffered entries become visible.
    TxnCommit,
    /// A transaction aborted; its buffered entries are discarded.
    TxnAbort,
    /// A document was inserted or replaced.
    InsertOrUpdate,
    /// A document was removed.
    Delete,
    /// Any other code (collection DDL, index changes, ...). Skipped.
    Unrecognized(i64),
}

impl OperationType {
    /// Converts from a numeric code.
    pub fn from_code(code: i64) -> Self {
        match code {
            2200 => OperationType::TxnStart,
            2201 => OperationType::TxnCommit,
            2002 => OperationType::TxnAbort,
            2300 => OperationType::InsertOrUpdate,
            2302 => OperationType::Delete,
            other => OperationType::Unrecognized(other),
        }
    }

    /// Converts to the numeric code.
    pub fn to_code(&self) -> i64 {
        match self {
            OperationType::TxnStart => 2200,
            OperationType::TxnCommit => 2201,
            OperationType::TxnAbort => 2002,
            OperationType::InsertOrUpdate => 2300,
            OperationType::Delete => 2302,
            OperationType::Unrecognized(code) => *code,
        }
    }

    /// Returns true for transaction control codes.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            OperationType::TxnStart | OperationType::TxnCommit | OperationType::TxnAbort
        )
    }

    /// Returns the dispatchable event kind, if any.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            OperationType::InsertOrUpdate => Some(EventKind::InsertOrUpdate),
            OperationType::Delete => Some(EventKind::Delete),
            _ => None,
        }
    }
}

/// Kind of a dispatched document change.
///
/// The log does not distinguish inserts from updates; consumers that
/// need the difference must inspect the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Document inserted or updated.
    InsertOrUpdate,
    /// Document deleted.
    Delete,
}

impl EventKind {
    /// All dispatchable kinds.
    pub const ALL: [EventKind; 2] = [EventKind::InsertOrUpdate, EventKind::Delete];

    /// Returns the stable label delivered to listeners.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::InsertOrUpdate => "insert/update",
            EventKind::Delete => "delete",
        }
    }

    /// Parses a label produced by [`EventKind::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "insert/update" => Some(EventKind::InsertOrUpdate),
            "delete" => Some(EventKind::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(OperationType::from_code(2200), OperationType::TxnStart);
        assert_eq!(OperationType::from_code(2201), OperationType::TxnCommit);
        assert_eq!(OperationType::from_code(2002), OperationType::TxnAbort);
        assert_eq!(OperationType::from_code(2300), OperationType::InsertOrUpdate);
        assert_eq!(OperationType::from_code(2302), OperationType::Delete);
        for code in [2200, 2201, 2002, 2300, 2302] {
            assert_eq!(OperationType::from_code(code).to_code(), code);
        }
    }

    #[test]
    fn unknown_codes_are_kept() {
        let op = OperationType::from_code(2000);
        assert_eq!(op, OperationType::Unrecognized(2000));
        assert!(!op.is_control());
        assert_eq!(op.event_kind(), None);
    }

    #[test]
    fn control_codes_have_no_event_kind() {
        for op in [
            OperationType::TxnStart,
            OperationType::TxnCommit,
            OperationType::TxnAbort,
        ] {
            assert!(op.is_control());
            assert!(op.event_kind().is_none());
        }
    }

    #[test]
    fn labels() {
        assert_eq!(EventKind::InsertOrUpdate.label(), "insert/update");
        assert_eq!(EventKind::Delete.label(), "delete");
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(EventKind::from_label("insert"), None);
    }
}
