//! Persisted per-tick state payloads. The external invoker hands the previous
//! tick's output back in as the next tick's input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Sole persisted state of one session-pool shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPoolState {
    /// Playable URLs, oldest first.
    #[serde(default)]
    pub url_list: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Persisted state of the prefetch window engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchWindowState {
    /// Media playlist being watched. `None` makes the next tick bootstrap a
    /// fresh session.
    #[serde(
        default,
        deserialize_with = "empty_string_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,
    /// Names of outstanding prefetch schedules, in creation order.
    #[serde(default)]
    pub prefetch_list: Vec<String>,
    /// End of the currently open retrieval window, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_window_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of one tick: the state to persist and what happened along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome<S, E> {
    pub state: S,
    pub effects: Vec<E>,
}

impl<S, E> TickOutcome<S, E> {
    pub fn new(state: S, effects: Vec<E>) -> Self {
        Self { state, effects }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
