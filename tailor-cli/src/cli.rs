use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tailor_engine::prefetch::DEFAULT_AD_SEGMENT_PREFIX;

#[derive(Parser, Debug)]
#[command(
    name = "tailor",
    version,
    about = "Run one tick of the session-pool or ad-prefetch controllers",
    long_about = "Each invocation reads the previous tick's state JSON (from --state or stdin), \
runs a single tick and prints the next state JSON on stdout. Logs go to stderr."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogFormat::Pretty,
        env = "TAILOR_LOG_FORMAT"
    )]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile one shard's session pool with its audience curve
    PoolTick(PoolTickArgs),

    /// Advance the prefetch retrieval window by one tick
    PrefetchTick(PrefetchTickArgs),

    /// Split an aggregate audience curve into per-shard requirements
    Shard(ShardArgs),
}

#[derive(ClapArgs, Debug)]
pub struct PoolTickArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub io: TickIo,

    /// This shard's audience curve as JSON
    #[arg(long, env = "SESSION_REQUIREMENTS")]
    pub session_requirements: String,

    /// Event start (RFC 3339); curve offsets are relative to it
    #[arg(long, env = "EVENT_START_TIME", value_parser = parse_instant)]
    pub event_start: DateTime<Utc>,

    /// Manifest probes in flight at once
    #[arg(long, env = "PROBE_CONCURRENCY", default_value_t = 1)]
    pub probe_concurrency: usize,
}

#[derive(ClapArgs, Debug)]
pub struct PrefetchTickArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub io: TickIo,

    /// Event end (RFC 3339); no window is reserved past it
    #[arg(long, env = "EVENT_END_TIME", value_parser = parse_instant)]
    pub event_end: DateTime<Utc>,

    #[arg(long, env = "RETRIEVAL_WINDOW_LENGTH_IN_SECONDS", default_value_t = 120)]
    pub retrieval_window_secs: u32,

    #[arg(long, env = "PLAYBACK_CONFIGURATION_NAME")]
    pub playback_configuration_name: String,

    /// Base URL of the prefetch-reservation API
    #[arg(long, env = "PREFETCH_API_ENDPOINT")]
    pub prefetch_api_endpoint: String,

    #[arg(long, env = "AVAIL_DURATION_SECS", default_value_t = 60)]
    pub avail_duration_secs: u32,

    /// URI prefixes of segments served by the ad stitcher
    #[arg(
        long,
        env = "AD_SEGMENT_PREFIXES",
        value_delimiter = ',',
        default_value = DEFAULT_AD_SEGMENT_PREFIX
    )]
    pub ad_segment_prefixes: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ShardArgs {
    /// Aggregate audience curve as JSON
    #[arg(long, env = "SESSION_REQUIREMENTS")]
    pub session_requirements: String,

    /// Number of pool workers
    #[arg(short = 'n', long, env = "SESSION_SHARDS")]
    pub shards: usize,

    /// Pretty-print the output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SessionArgs {
    #[arg(long, env = "SESSION_INITIALIZATION_URL")]
    pub session_initialization_url: String,

    /// Host that relative manifest URLs are resolved against (https)
    #[arg(long, env = "HOST_NAME", default_value = "")]
    pub host_name: String,

    /// Rendition picked from master playlists
    #[arg(long, env = "INDEX_OF_RENDITIONS", default_value_t = 0)]
    pub index_of_renditions: usize,
}

#[derive(ClapArgs, Debug)]
pub struct HttpArgs {
    /// Per-request timeout in seconds
    #[arg(
        long,
        env = "HTTP_TIMEOUT_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub http_timeout_secs: u64,
}

#[derive(ClapArgs, Debug)]
pub struct TickIo {
    /// Previous state JSON file; stdin when omitted or `-`
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    /// Include the tick's effect records under `effects`
    #[arg(long)]
    pub emit_effects: bool,
}

pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp, got `{raw}`: {e}"))
}
