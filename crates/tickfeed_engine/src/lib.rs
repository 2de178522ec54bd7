//! # tickfeed engine
//!
//! Follows a database replication log and turns it into filtered,
//! per-collection change events.
//!
//! This crate provides:
//! - `LogFollower`: cursor management and the poll/backoff loop
//! - `TransactionBuffer`: commit replay and abort suppression
//! - `SubscriptionRegistry`: per-collection event and key filters
//! - `Dispatcher`: filter application and listener fan-out
//! - `HttpClient`: the transport abstraction, plus a scripted mock
//!
//! ## Data flow
//!
//! ```text
//! HttpClient -> LogFollower -> LogEntry::parse -> TransactionBuffer -> Dispatcher -> listeners
//! ```
//!
//! ## Key Invariants
//!
//! - The cursor never moves backwards
//! - Transactional writes are delivered only on commit, in arrival order
//! - Aborted transactions deliver nothing
//! - An empty filter set matches everything
//! - At most one request is in flight per follower

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatch;
mod error;
mod follower;
mod http;
mod registry;
mod transaction;

pub use config::{FollowerConfig, DEFAULT_IDLE_BACKOFF};
pub use dispatch::{ChangeEvent, Delivery, Dispatcher, Listener};
pub use error::{FatalError, FatalErrorKind, FollowError, FollowResult};
pub use follower::{
    ErrorListener, FollowerState, FollowerStats, LogFollower, PollOutcome, StopHandle,
};
pub use http::{Headers, HttpClient, HttpResponse, MockHttpClient};
pub use registry::{CollectionFilter, IntoSubscriptions, Subscription, SubscriptionRegistry};
pub use transaction::{Routed, TransactionBuffer, TxnViolation};
pub use tickfeed_protocol::{EventKind, LogEntry, OperationType, Tick};
