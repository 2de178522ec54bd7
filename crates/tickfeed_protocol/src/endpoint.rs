//! Replication endpoints and the logger-state response.

use crate::error::{ProtocolError, ProtocolResult};
use crate::tick::Tick;
use serde::Deserialize;

/// Database followed when the URL path names none.
pub const DEFAULT_DATABASE: &str = "_system";

/// Follow response header carrying the last included tick (`"0"` if none).
pub const LAST_INCLUDED_HEADER: &str = "x-arango-replication-lastincluded";

/// Derives the database name from a URL path.
///
/// `/` and the empty path select [`DEFAULT_DATABASE`].
pub fn database_from_path(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_DATABASE
    } else {
        trimmed
    }
}

/// Request paths for one database's replication log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    database: String,
    logger_state: String,
    logger_follow: String,
}

impl Endpoints {
    /// Builds the paths for a database.
    pub fn for_database(database: &str) -> Self {
        let database = database_from_path(database);
        Self {
            database: database.to_string(),
            logger_state: format!("/_db/{database}/_api/replication/logger-state"),
            logger_follow: format!("/_db/{database}/_api/replication/logger-follow"),
        }
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Path of the current log position request.
    pub fn logger_state(&self) -> &str {
        &self.logger_state
    }

    /// Path of the follow request for entries strictly after `from`.
    pub fn logger_follow(&self, from: &Tick) -> String {
        format!("{}?from={}", self.logger_follow, from)
    }
}

/// Decoded body of a logger-state response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerState {
    /// Tick of the last entry written to the log.
    pub last_log_tick: Tick,
    /// Whether the logger reports itself as running.
    pub running: Option<bool>,
    /// Server version string, if reported.
    pub server_version: Option<String>,
}

#[derive(Deserialize)]
struct StateBody {
    state: StateSection,
    #[serde(default)]
    server: Option<ServerSection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateSection {
    last_log_tick: String,
    #[serde(default)]
    running: Option<bool>,
}

#[derive(Deserialize)]
struct ServerSection {
    #[serde(default)]
    version: Option<String>,
}

impl LoggerState {
    /// Decodes a logger-state body.
    pub fn parse(body: &[u8]) -> ProtocolResult<Self> {
        let body: StateBody = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::InvalidLoggerState(e.to_string()))?;
        let last_log_tick = Tick::parse(&body.state.last_log_tick)
            .map_err(|e| ProtocolError::InvalidLoggerState(e.to_string()))?;

        Ok(Self {
            last_log_tick,
            running: body.state.running,
            server_version: body.server.and_then(|s| s.version),
        })
    }
}
