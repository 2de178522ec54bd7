//! # tickfeed protocol
//!
//! Wire types for following a database replication log.
//!
//! This crate provides:
//! - `Tick`, the ordered cursor into the log
//! - `OperationType` / `EventKind` for the upstream operation codes
//! - `LogEntry` and the entry parser for newline-delimited records
//! - Endpoint paths and the logger-state response body
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod entry;
mod error;
mod operation;
mod tick;

pub use endpoint::{
    database_from_path, Endpoints, LoggerState, DEFAULT_DATABASE, LAST_INCLUDED_HEADER,
};
pub use entry::{split_records, LogEntry, NO_TRANSACTION};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{EventKind, OperationType};
pub use tick::Tick;
