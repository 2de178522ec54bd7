//! Transaction buffering and commit replay.
//!
//! Entries written inside a multi-statement transaction appear in the log
//! before the transaction resolves. They are held per transaction id and
//! released in arrival order on commit, or dropped on abort.

use std::collections::HashMap;
use thiserror::Error;
use tickfeed_protocol::{LogEntry, OperationType};

/// An entry that does not fit the open/commit/abort protocol.
///
/// These happen when following starts in the middle of a transaction or
/// the upstream format drifts. The entry is dropped; following continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnViolation {
    /// A document entry referenced a transaction that is not open.
    #[error("entry for unopened transaction {0}")]
    EntryNotOpen(String),
    /// A commit referenced a transaction that is not open.
    #[error("commit of unopened transaction {0}")]
    CommitNotOpen(String),
    /// An abort referenced a transaction that is not open.
    #[error("abort of unopened transaction {0}")]
    AbortNotOpen(String),
    /// A control entry carried the non-transactional id.
    #[error("transaction control entry without transaction id")]
    ControlWithoutTransaction,
}

/// Outcome of routing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A standalone entry, ready for dispatch.
    Passthrough(LogEntry),
    /// A transaction committed; its entries in arrival order.
    Committed(Vec<LogEntry>),
    /// A transaction was opened.
    Opened,
    /// The entry was appended to an open transaction.
    Buffered,
    /// A transaction aborted; this many entries were discarded.
    Aborted {
        /// Number of discarded entries.
        discarded: usize,
    },
    /// The operation type is not one this engine handles.
    Skipped,
    /// The entry broke the transaction protocol and was dropped.
    Violation(TxnViolation),
}

/// Per-transaction accumulator.
#[derive(Debug, Default)]
pub struct TransactionBuffer {
    open: HashMap<String, Vec<LogEntry>>,
}

impl TransactionBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an entry through the open/commit/abort protocol.
    pub fn route(&mut self, entry: LogEntry) -> Routed {
        match entry.op_type {
            OperationType::TxnStart | OperationType::TxnCommit | OperationType::TxnAbort
                if !entry.is_transactional() =>
            {
                Routed::Violation(TxnViolation::ControlWithoutTransaction)
            }
            OperationType::TxnStart => {
                // A stale buffer under the same id is discarded.
                self.open.insert(entry.transaction_id, Vec::new());
                Routed::Opened
            }
            OperationType::TxnCommit => match self.open.remove(&entry.transaction_id) {
                Some(entries) => Routed::Committed(entries),
                None => Routed::Violation(TxnViolation::CommitNotOpen(entry.transaction_id)),
            },
            OperationType::TxnAbort => match self.open.remove(&entry.transaction_id) {
                Some(entries) => Routed::Aborted {
                    discarded: entries.len(),
                },
                None => Routed::Violation(TxnViolation::AbortNotOpen(entry.transaction_id)),
            },
            OperationType::InsertOrUpdate | OperationType::Delete => {
                if !entry.is_transactional() {
                    return Routed::Passthrough(entry);
                }
                match self.open.get_mut(&entry.transaction_id) {
                    Some(buffered) => {
                        buffered.push(entry);
                        Routed::Buffered
                    }
                    None => Routed::Violation(TxnViolation::EntryNotOpen(entry.transaction_id)),
                }
            }
            OperationType::Unrecognized(_) => Routed::Skipped,
        }
    }

    /// Returns the number of open transactions.
    pub fn open_transactions(&self) -> usize {
        self.open.len()
    }

    /// Returns the number of entries held for a transaction.
    pub fn buffered_len(&self, transaction_id: &str) -> Option<usize> {
        self.open.get(transaction_id).map(Vec::len)
    }
}
