//! tickfeed CLI
//!
//! Follows an ArangoDB replication log and prints committed document
//! changes, one per line.
//!
//! # Commands
//!
//! - `follow` - Stream changes for one or more collections

mod client;
mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Replication log follower.
#[derive(Parser)]
#[command(name = "tickfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream committed changes until stopped or a fatal error
    Follow {
        /// Server URL; its path selects the database (e.g. http://host:8529/shop)
        url: String,

        /// Collection to follow (repeatable)
        #[arg(short, long = "collection", required = true)]
        collections: Vec<String>,

        /// Only these events: "insert/update" or "delete" (repeatable)
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Only these document keys (repeatable)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Resume after this tick instead of the current log position
        #[arg(long)]
        from: Option<String>,

        /// User for basic authentication
        #[arg(short, long)]
        username: Option<String>,

        /// Password for basic authentication
        #[arg(short, long)]
        password: Option<String>,

        /// Wait after an empty tail, in milliseconds
        #[arg(long, default_value = "500")]
        backoff_ms: u64,

        /// Request timeout, in seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only events.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Follow {
            url,
            collections,
            events,
            keys,
            from,
            username,
            password,
            backoff_ms,
            timeout_secs,
            format,
        } => {
            let args = commands::follow::FollowArgs {
                url,
                collections,
                events,
                keys,
                from,
                username,
                password,
                backoff_ms,
                timeout_secs,
                format: format.parse()?,
            };
            commands::follow::run(args)?;
        }
    }

    Ok(())
}
