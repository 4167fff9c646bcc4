//! Audience curve model: how many concurrent sessions should exist at a given
//! instant, and how an aggregate curve splits across parallel pool workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TailorError};

/// Knot of a piecewise-linear audience curve. Offsets are relative to the
/// event start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthPoint {
    pub point_in_seconds: u64,
    pub session_volume: u32,
}

impl GrowthPoint {
    pub const fn new(point_in_seconds: u64, session_volume: u32) -> Self {
        Self {
            point_in_seconds,
            session_volume,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrowthPattern {
    #[default]
    Linear,
}

/// One shard's share of the audience curve. Built once at setup and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequirements {
    pub growth_pattern: GrowthPattern,
    pub graph: Vec<GrowthPoint>,
}

impl SessionRequirements {
    pub fn linear(graph: Vec<GrowthPoint>) -> Self {
        Self {
            growth_pattern: GrowthPattern::Linear,
            graph,
        }
    }

    /// Parse and validate the JSON form used in deployment configuration.
    pub fn from_json(raw: &str) -> Result<Self> {
        let requirements: Self = serde_json::from_str(raw).map_err(|e| {
            TailorError::configuration(format!("unparsable session requirements: {e}"))
        })?;
        requirements.validate()?;
        Ok(requirements)
    }

    /// A curve needs at least one knot, in ascending offset order.
    pub fn validate(&self) -> Result<()> {
        if self.graph.is_empty() {
            return Err(TailorError::configuration(
                "audience curve must contain at least one point",
            ));
        }
        if let Some(pair) = self
            .graph
            .windows(2)
            .find(|pair| pair[1].point_in_seconds < pair[0].point_in_seconds)
        {
            return Err(TailorError::configuration(format!(
                "audience curve is not sorted: point at {}s follows point at {}s",
                pair[1].point_in_seconds, pair[0].point_in_seconds
            )));
        }
        Ok(())
    }

    pub fn desired_volume(&self, event_start: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        desired_volume(event_start, now, &self.graph)
    }
}

/// Instantaneous target session count at `now` for a curve anchored at
/// `event_start`.
pub fn desired_volume(event_start: DateTime<Utc>, now: DateTime<Utc>, graph: &[GrowthPoint]) -> u32 {
    let offset_secs = (now - event_start).num_milliseconds() as f64 / 1000.0;
    desired_volume_at_offset(offset_secs, graph)
}

/// Clamps to the boundary knots outside the curve and linearly interpolates
/// between bracketing knots, rounding half up. An empty graph yields 0.
pub fn desired_volume_at_offset(offset_secs: f64, graph: &[GrowthPoint]) -> u32 {
    let (Some(first), Some(last)) = (graph.first(), graph.last()) else {
        return 0;
    };

    if offset_secs <= first.point_in_seconds as f64 {
        return first.session_volume;
    }
    if offset_secs >= last.point_in_seconds as f64 {
        return last.session_volume;
    }

    // first < offset < last, so a bracketing pair with t0 <= offset < t1 exists
    // and t1 > t0 strictly.
    let Some(pair) = graph.windows(2).find(|pair| {
        (pair[0].point_in_seconds as f64) <= offset_secs
            && offset_secs < pair[1].point_in_seconds as f64
    }) else {
        return last.session_volume;
    };

    let (from, to) = (pair[0], pair[1]);
    let span = (to.point_in_seconds - from.point_in_seconds) as f64;
    let progress = (offset_secs - from.point_in_seconds as f64) / span;
    let value = from.session_volume as f64
        + (to.session_volume as f64 - from.session_volume as f64) * progress;

    (value + 0.5).floor().max(0.0) as u32
}

/// Split an aggregate curve across `shards` workers.
///
/// Every knot's volume is divided into integer parts that sum exactly to the
/// original. The remainder `v % shards` goes one unit at a time to the
/// lowest-numbered shards, so shard 0 absorbs it first for every knot and no
/// shard ever differs from another by more than one session.
pub fn shard(requirements: &SessionRequirements, shards: usize) -> Result<Vec<SessionRequirements>> {
    if shards == 0 {
        return Err(TailorError::configuration("shard count must be positive"));
    }
    requirements.validate()?;

    let n = shards as u32;
    let parts = (0..n)
        .map(|index| SessionRequirements {
            growth_pattern: requirements.growth_pattern,
            graph: requirements
                .graph
                .iter()
                .map(|point| GrowthPoint {
                    point_in_seconds: point.point_in_seconds,
                    session_volume: shard_share(point.session_volume, n, index),
                })
                .collect(),
        })
        .collect();

    Ok(parts)
}

fn shard_share(volume: u32, shards: u32, index: u32) -> u32 {
    let base = volume / shards;
    let remainder = volume % shards;
    if index < remainder { base + 1 } else { base }
}
