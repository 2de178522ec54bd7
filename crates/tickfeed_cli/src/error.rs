//! CLI errors.

use thiserror::Error;

/// Errors raised before or while following.
#[derive(Error, Debug)]
pub enum CliError {
    /// The server URL could not be parsed.
    #[error("invalid server URL {url:?}: {source}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The URL scheme is not http or https.
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    /// Unknown `--format` value.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    /// Following failed.
    #[error(transparent)]
    Follow(#[from] tickfeed_engine::FollowError),

    /// The `--from` tick is not a decimal number.
    #[error(transparent)]
    Protocol(#[from] tickfeed_protocol::ProtocolError),
}
