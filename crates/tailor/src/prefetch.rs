//! Prefetch window engine.
//!
//! Each tick reads the live media playlist and keeps a rolling retrieval
//! window of prefetch schedules ahead of the live edge:
//!
//! - when the newest segment was served by the ad stitcher, the avail has
//!   ended and every outstanding schedule is deleted;
//! - otherwise, when the open window no longer covers the live edge plus one
//!   target duration, the next window is reserved back to back with the
//!   previous one (or at the live edge when none is open);
//! - a window that would run past the event end is never reserved.
//!
//! At most one schedule is created per tick. The engine assumes a single
//! instance per playback configuration.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use m3u8_rs::MediaPlaylist;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::playlist::{Playlist, PlaylistSource};
use crate::reservation::{AVAIL_DURATION_VARIABLE, PrefetchReservations, ScheduleRequest};
use crate::session::{SessionInitializer, acquire_playback_url};
use crate::state::{PrefetchWindowState, TickOutcome};

pub const DEFAULT_AD_SEGMENT_PREFIX: &str = "https://segments.mediatailor.";

/// Live edge used when the playlist gives no usable timing.
pub const LIVE_EDGE_SAFETY_BUFFER: Duration = Duration::seconds(15);

/// Target durations added past the newest segment's program date time.
pub const LIVE_EDGE_LOOKAHEAD_SEGMENTS: i32 = 3;

/// Recognises segments served by the ad-decisioning overlay rather than by
/// the content origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailEndDetector {
    prefixes: Vec<String>,
}

impl Default for AvailEndDetector {
    fn default() -> Self {
        Self::new([DEFAULT_AD_SEGMENT_PREFIX])
    }
}

impl AvailEndDetector {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_stitched_segment(&self, uri: &str) -> bool {
        self.prefixes.iter().any(|prefix| uri.starts_with(prefix.as_str()))
    }

    /// Whether the newest segment of `playlist` came from the ad stitcher.
    pub fn avail_ended(&self, playlist: &MediaPlaylist) -> bool {
        playlist
            .segments
            .last()
            .is_some_and(|segment| self.is_stitched_segment(&segment.uri))
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub event_end: DateTime<Utc>,
    pub retrieval_window: Duration,
    /// Rendition picked when a bootstrapped session is a master playlist.
    pub rendition_index: usize,
    /// Value of the avail-duration dynamic variable attached to every schedule.
    pub avail_duration_secs: u32,
    pub detector: AvailEndDetector,
}

impl PrefetchConfig {
    pub fn new(event_end: DateTime<Utc>, retrieval_window: Duration) -> Self {
        Self {
            event_end,
            retrieval_window,
            rendition_index: 0,
            avail_duration_secs: 60,
            detector: AvailEndDetector::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PrefetchEffect {
    SessionBootstrapped {
        url: String,
    },
    BootstrapFailed {
        reason: String,
    },
    PlaylistUnavailable {
        url: String,
        reason: String,
    },
    AvailEnded {
        outstanding: usize,
    },
    ScheduleDeleted {
        name: String,
    },
    ScheduleDeleteFailed {
        name: String,
        reason: String,
    },
    WindowCovered {
        live_edge: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },
    EventEnded {
        next_start: DateTime<Utc>,
        next_end: DateTime<Utc>,
    },
    ScheduleCreated {
        name: String,
        retrieval_start: DateTime<Utc>,
        retrieval_end: DateTime<Utc>,
    },
    ScheduleCreateFailed {
        name: String,
        reason: String,
    },
}

/// Most recent point believed to be playing: the newest segment's program
/// date time plus a lookahead of three target durations, or `now` plus a
/// safety buffer when that timing is missing or not representable.
pub fn live_edge(playlist: &MediaPlaylist, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now.checked_add_signed(LIVE_EDGE_SAFETY_BUFFER).unwrap_or(now);
    let Some(pdt) = playlist
        .segments
        .last()
        .and_then(|segment| segment.program_date_time)
    else {
        return fallback;
    };

    target_duration(playlist)
        .and_then(|step| step.checked_mul(LIVE_EDGE_LOOKAHEAD_SEGMENTS))
        .and_then(|lookahead| pdt.with_timezone(&Utc).checked_add_signed(lookahead))
        .unwrap_or_else(|| {
            warn!(
                target_duration = playlist.target_duration,
                "Live edge lookahead out of range, using the safety buffer"
            );
            fallback
        })
}

/// A window is expiring when none is open or when it ends before the live
/// edge plus one target duration. An unrepresentable sum counts as expiring.
pub fn is_window_expiring(
    live_edge: DateTime<Utc>,
    target_duration: Duration,
    window_end: Option<DateTime<Utc>>,
) -> bool {
    match window_end {
        None => true,
        Some(end) => live_edge
            .checked_add_signed(target_duration)
            .is_none_or(|deadline| deadline > end),
    }
}

fn target_duration(playlist: &MediaPlaylist) -> Option<Duration> {
    i64::try_from(playlist.target_duration)
        .ok()
        .and_then(Duration::try_seconds)
}

pub struct PrefetchWindowEngine {
    config: PrefetchConfig,
    sessions: Arc<dyn SessionInitializer>,
    playlists: Arc<dyn PlaylistSource>,
    reservations: Arc<dyn PrefetchReservations>,
    clock: Arc<dyn Clock>,
}

impl PrefetchWindowEngine {
    pub fn new(
        config: PrefetchConfig,
        sessions: Arc<dyn SessionInitializer>,
        playlists: Arc<dyn PlaylistSource>,
        reservations: Arc<dyn PrefetchReservations>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sessions,
            playlists,
            reservations,
            clock,
        }
    }

    pub async fn tick(
        &self,
        state: PrefetchWindowState,
    ) -> TickOutcome<PrefetchWindowState, PrefetchEffect> {
        let now = self.clock.now();
        let mut effects = Vec::new();
        let mut state = PrefetchWindowState {
            timestamp: Some(now),
            ..state
        };

        let url = match state.url.clone() {
            Some(url) => url,
            None => match acquire_playback_url(
                self.sessions.as_ref(),
                self.playlists.as_ref(),
                self.config.rendition_index,
            )
            .await
            {
                Ok(url) => {
                    info!(url = %url, "Bootstrapped prefetch session");
                    effects.push(PrefetchEffect::SessionBootstrapped { url: url.clone() });
                    state.url = Some(url.clone());
                    url
                }
                Err(e) => {
                    error!(error = %e, "Failed to bootstrap a session");
                    effects.push(PrefetchEffect::BootstrapFailed {
                        reason: e.to_string(),
                    });
                    return TickOutcome::new(state, effects);
                }
            },
        };

        let playlist = match self.playlists.fetch(&url).await {
            Ok(Playlist::Media(playlist)) => playlist,
            Ok(Playlist::Master(_)) => {
                error!(url = %url, "Expected a media playlist, got a master playlist");
                effects.push(PrefetchEffect::PlaylistUnavailable {
                    url,
                    reason: "master playlist".to_string(),
                });
                return TickOutcome::new(state, effects);
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to fetch the HLS manifest");
                effects.push(PrefetchEffect::PlaylistUnavailable {
                    url,
                    reason: e.to_string(),
                });
                return TickOutcome::new(state, effects);
            }
        };

        if self.config.detector.avail_ended(&playlist) {
            self.drain_schedules(&mut state, &mut effects).await;
            return TickOutcome::new(state, effects);
        }

        let edge = live_edge(&playlist, now);
        let step = target_duration(&playlist).unwrap_or(Duration::MAX);
        if !is_window_expiring(edge, step, state.retrieval_window_end) {
            if let Some(window_end) = state.retrieval_window_end {
                debug!(
                    live_edge = %edge,
                    window_end = %window_end,
                    "Retrieval window still covers the live edge"
                );
                effects.push(PrefetchEffect::WindowCovered {
                    live_edge: edge,
                    window_end,
                });
            }
            return TickOutcome::new(state, effects);
        }

        let next_start = state.retrieval_window_end.unwrap_or(edge);
        let next_end = next_start
            .checked_add_signed(self.config.retrieval_window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if next_start > self.config.event_end || next_end > self.config.event_end {
            info!(
                next_start = %next_start,
                next_end = %next_end,
                event_end = %self.config.event_end,
                "The event has ended"
            );
            effects.push(PrefetchEffect::EventEnded {
                next_start,
                next_end,
            });
            return TickOutcome::new(state, effects);
        }

        let request = ScheduleRequest {
            name: Uuid::new_v4().to_string(),
            retrieval_start: next_start,
            retrieval_end: next_end,
            consumption_start: next_start,
            consumption_end: self.config.event_end,
            dynamic_variable: AVAIL_DURATION_VARIABLE.to_string(),
            dynamic_value: self.config.avail_duration_secs.to_string(),
        };
        match self.reservations.create(&request).await {
            Ok(created) => {
                let window_end = created.retrieval_end.unwrap_or(next_end);
                info!(
                    name = %created.name,
                    retrieval_start = %next_start,
                    retrieval_end = %window_end,
                    "Created a prefetch schedule"
                );
                effects.push(PrefetchEffect::ScheduleCreated {
                    name: created.name.clone(),
                    retrieval_start: next_start,
                    retrieval_end: window_end,
                });
                state.prefetch_list.push(created.name);
                state.retrieval_window_end = Some(window_end);
            }
            Err(e) => {
                error!(name = %request.name, error = %e, "Failed to create a prefetch schedule");
                effects.push(PrefetchEffect::ScheduleCreateFailed {
                    name: request.name,
                    reason: e.to_string(),
                });
            }
        }

        TickOutcome::new(state, effects)
    }

    /// Best-effort delete of every outstanding schedule; the window is closed
    /// regardless of individual failures.
    async fn drain_schedules(
        &self,
        state: &mut PrefetchWindowState,
        effects: &mut Vec<PrefetchEffect>,
    ) {
        let outstanding = std::mem::take(&mut state.prefetch_list);
        effects.push(PrefetchEffect::AvailEnded {
            outstanding: outstanding.len(),
        });
        for name in outstanding {
            match self.reservations.delete(&name).await {
                Ok(()) => {
                    info!(name = %name, "Deleted a prefetch schedule");
                    effects.push(PrefetchEffect::ScheduleDeleted { name });
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to delete a prefetch schedule");
                    effects.push(PrefetchEffect::ScheduleDeleteFailed {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        state.retrieval_window_end = None;
    }
}
