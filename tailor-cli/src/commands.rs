use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tailor_engine::{
    AvailEndDetector, HttpClientConfig, HttpReservationClient, HttpSessionBootstrap,
    PlaylistClient, PoolConfig, PrefetchConfig, PrefetchWindowEngine, PrefetchWindowState,
    SessionPoolController, SessionPoolState, SessionRequirements, SystemClock, TickOutcome,
    build_client, volume,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::cli::{HttpArgs, PoolTickArgs, PrefetchTickArgs, ShardArgs};
use crate::error::{AppError, Result};

pub async fn pool_tick(args: PoolTickArgs) -> Result<()> {
    let requirements = SessionRequirements::from_json(&args.session_requirements)?;
    let client = build_client(&http_config(&args.http))?;

    let mut config = PoolConfig::new(requirements, args.event_start);
    config.rendition_index = args.session.index_of_renditions;
    config.probe_concurrency = args.probe_concurrency;

    let controller = SessionPoolController::new(
        config,
        Arc::new(HttpSessionBootstrap::new(
            client.clone(),
            args.session.session_initialization_url,
            Some(args.session.host_name),
        )),
        Arc::new(PlaylistClient::new(client)),
        Arc::new(SystemClock),
    );

    let state: SessionPoolState = read_state(args.io.state.as_deref()).await?;
    debug!(tracked = state.url_list.len(), "Loaded pool state");
    let outcome = controller.tick(state).await;
    info!(tracked = outcome.state.url_list.len(), "Pool tick complete");
    write_outcome(&outcome, args.io.emit_effects)
}

pub async fn prefetch_tick(args: PrefetchTickArgs) -> Result<()> {
    let client = build_client(&http_config(&args.http))?;
    let reservations = HttpReservationClient::new(
        client.clone(),
        &args.prefetch_api_endpoint,
        args.playback_configuration_name,
    )?;

    let mut config = PrefetchConfig::new(
        args.event_end,
        chrono::Duration::seconds(i64::from(args.retrieval_window_secs)),
    );
    config.rendition_index = args.session.index_of_renditions;
    config.avail_duration_secs = args.avail_duration_secs;
    config.detector = AvailEndDetector::new(args.ad_segment_prefixes);

    let engine = PrefetchWindowEngine::new(
        config,
        Arc::new(HttpSessionBootstrap::new(
            client.clone(),
            args.session.session_initialization_url,
            Some(args.session.host_name),
        )),
        Arc::new(PlaylistClient::new(client)),
        Arc::new(reservations),
        Arc::new(SystemClock),
    );

    let state: PrefetchWindowState = read_state(args.io.state.as_deref()).await?;
    debug!(
        outstanding = state.prefetch_list.len(),
        has_url = state.url.is_some(),
        "Loaded prefetch state"
    );
    let outcome = engine.tick(state).await;
    info!(
        outstanding = outcome.state.prefetch_list.len(),
        "Prefetch tick complete"
    );
    write_outcome(&outcome, args.io.emit_effects)
}

pub fn shard(args: ShardArgs) -> Result<()> {
    let requirements = SessionRequirements::from_json(&args.session_requirements)?;
    let shards = volume::shard(&requirements, args.shards)?;
    let out = if args.pretty {
        serde_json::to_string_pretty(&shards)
    } else {
        serde_json::to_string(&shards)
    }
    .map_err(AppError::Output)?;
    println!("{out}");
    Ok(())
}

fn http_config(args: &HttpArgs) -> HttpClientConfig {
    HttpClientConfig::default().with_timeout(Duration::from_secs(args.http_timeout_secs))
}

/// Previous tick's state from `path` (or stdin). Blank input is a first tick.
async fn read_state<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match path {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path).await?,
        _ => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };
    parse_state(&raw)
}

fn parse_state<T>(raw: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(AppError::InvalidState)
}

fn write_outcome<S, E>(outcome: &TickOutcome<S, E>, emit_effects: bool) -> Result<()>
where
    S: Serialize,
    E: Serialize,
{
    println!("{}", render_outcome(outcome, emit_effects)?);
    Ok(())
}

fn render_outcome<S, E>(outcome: &TickOutcome<S, E>, emit_effects: bool) -> Result<String>
where
    S: Serialize,
    E: Serialize,
{
    let mut value = serde_json::to_value(&outcome.state).map_err(AppError::Output)?;
    if emit_effects && let Value::Object(map) = &mut value {
        let effects = serde_json::to_value(&outcome.effects).map_err(AppError::Output)?;
        map.insert("effects".to_string(), effects);
    }
    serde_json::to_string(&value).map_err(AppError::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tailor_engine::PoolEffect;

    #[test]
    fn blank_input_is_a_first_tick() {
        let state: PrefetchWindowState = parse_state("  \n").unwrap();
        assert_eq!(state, PrefetchWindowState::default());
    }

    #[test]
    fn empty_url_starts_over() {
        let state: PrefetchWindowState =
            parse_state(r#"{"url":"","prefetchList":["a"],"timestamp":null}"#).unwrap();
        assert!(state.url.is_none());
        assert_eq!(state.prefetch_list, vec!["a"]);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let err = parse_state::<SessionPoolState>("{not json").unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn effects_only_when_requested() {
        let outcome = TickOutcome::new(
            SessionPoolState {
                url_list: vec!["https://a/1.m3u8".to_string()],
                timestamp: None,
            },
            vec![PoolEffect::Truncated { removed: 2 }],
        );

        let plain: Value = serde_json::from_str(&render_outcome(&outcome, false).unwrap()).unwrap();
        assert_eq!(plain, json!({ "urlList": ["https://a/1.m3u8"], "timestamp": null }));

        let full: Value = serde_json::from_str(&render_outcome(&outcome, true).unwrap()).unwrap();
        assert_eq!(full["effects"][0]["type"], "truncated");
        assert_eq!(full["effects"][0]["removed"], 2);
    }

    #[test]
    fn timeout_flows_into_client_config() {
        let config = http_config(&HttpArgs {
            http_timeout_secs: 3,
        });
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(build_client(&config).is_ok());
    }
}
