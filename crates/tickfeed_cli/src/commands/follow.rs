//! Follow command implementation.

use crate::client::ReqwestClient;
use crate::error::CliError;
use serde::Serialize;
use serde_json::value::RawValue;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;
use tickfeed_engine::{ChangeEvent, FollowerConfig, LogFollower, Subscription, Tick};
use tickfeed_protocol::database_from_path;
use tracing::{info, warn};
use url::Url;

/// How events are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `label collection/key payload`, with the tick when known.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Arguments of the follow command.
#[derive(Debug)]
pub struct FollowArgs {
    /// Server URL; the path names the database.
    pub url: String,
    /// Collections to follow.
    pub collections: Vec<String>,
    /// Event labels to keep (empty = all).
    pub events: Vec<String>,
    /// Document keys to keep (empty = all).
    pub keys: Vec<String>,
    /// Tick to resume after.
    pub from: Option<String>,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Empty-tail backoff in milliseconds.
    pub backoff_ms: u64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Output format.
    pub format: OutputFormat,
}

/// A change as printed in JSON mode.
#[derive(Debug, Serialize)]
pub struct EventLine<'a> {
    /// Collection name.
    pub collection: &'a str,
    /// `"insert/update"` or `"delete"`.
    pub label: &'a str,
    /// Document key.
    pub key: &'a str,
    /// Log tick of the change, if the record carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<&'a str>,
    /// The document, unparsed.
    pub data: &'a RawValue,
}

/// Splits a server URL into the URL and the database its path names.
pub fn parse_server(raw: &str) -> Result<(Url, String), CliError> {
    let url = Url::parse(raw).map_err(|source| CliError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CliError::UnsupportedScheme(url.scheme().to_string()));
    }
    let database = database_from_path(url.path()).to_string();
    Ok((url, database))
}

/// Builds one descriptor per distinct collection, each carrying the same
/// event and key filters.
pub fn subscriptions(
    collections: &[String],
    events: &[String],
    keys: &[String],
) -> Result<Vec<Subscription>, CliError> {
    let mut names = collections.to_vec();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .map(|name| {
            let mut sub = Subscription::new(name);
            if !events.is_empty() {
                sub = sub.with_event_labels(events)?;
            }
            if !keys.is_empty() {
                sub = sub.with_keys(keys.iter().cloned());
            }
            Ok(sub)
        })
        .collect()
}

/// Formats one event for output.
pub fn render(event: &ChangeEvent, format: OutputFormat) -> Result<String, serde_json::Error> {
    let tick = event.tick.as_ref().map(Tick::as_str);
    match format {
        OutputFormat::Json => {
            let data: &RawValue = serde_json::from_str(&event.payload)?;
            serde_json::to_string(&EventLine {
                collection: &event.collection,
                label: event.label(),
                key: &event.key,
                tick,
                data,
            })
        }
        OutputFormat::Text => Ok(match tick {
            Some(tick) => format!(
                "[{tick}] {} {}/{} {}",
                event.label(),
                event.collection,
                event.key,
                event.payload
            ),
            None => format!(
                "{} {}/{} {}",
                event.label(),
                event.collection,
                event.key,
                event.payload
            ),
        }),
    }
}

/// Runs the follow command until a fatal error or a closed stdout.
pub fn run(args: FollowArgs) -> Result<(), CliError> {
    let (url, database) = parse_server(&args.url)?;
    let subscriptions = subscriptions(&args.collections, &args.events, &args.keys)?;

    let mut client = ReqwestClient::new(&url, Duration::from_secs(args.timeout_secs))?;
    let username = args
        .username
        .or_else(|| Some(url.username().to_string()).filter(|u| !u.is_empty()));
    let password = args.password.or_else(|| url.password().map(String::from));
    if let Some(username) = username {
        client = client.with_basic_auth(username, password);
    }

    let mut config =
        FollowerConfig::new(database).with_idle_backoff(Duration::from_millis(args.backoff_ms));
    if let Some(from) = &args.from {
        config = config.with_start_tick(Tick::parse(from)?);
    }

    info!(
        server = client.origin(),
        database = %config.database,
        collections = subscriptions.len(),
        "following replication log"
    );

    let follower = LogFollower::new(config, client);
    let stopper = follower.stop_handle();
    for sub in &subscriptions {
        let stopper = stopper.clone();
        let format = args.format;
        follower.on(sub.collection.clone(), move |event: &ChangeEvent| {
            let line = match render(event, format) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, key = %event.key, "skipping unprintable event");
                    return;
                }
            };
            let mut out = std::io::stdout().lock();
            if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                // Reader went away.
                stopper.stop();
            }
        });
    }
    follower.subscribe(subscriptions);

    follower.run()?;
    Ok(())
}
