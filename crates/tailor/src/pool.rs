//! Session pool controller: one instance per shard, reconciling the tracked
//! sessions with the shard's share of the audience curve on every tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::playlist::PlaylistSource;
use crate::session::{SessionInitializer, acquire_playback_url};
use crate::state::{SessionPoolState, TickOutcome};
use crate::volume::SessionRequirements;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// This shard's share of the audience curve.
    pub requirements: SessionRequirements,
    pub event_start: DateTime<Utc>,
    /// Rendition picked when a new session resolves to a master playlist.
    pub rendition_index: usize,
    /// Manifest probes in flight at once; 1 probes sequentially.
    pub probe_concurrency: usize,
}

impl PoolConfig {
    pub fn new(requirements: SessionRequirements, event_start: DateTime<Utc>) -> Self {
        Self {
            requirements,
            event_start,
            rendition_index: 0,
            probe_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PoolEffect {
    Target { desired: u32, tracked: usize },
    SessionCreated { url: String },
    SessionFailed { reason: String },
    Truncated { removed: usize },
    Probed { url: String },
    ProbeFailed { url: String, reason: String },
}

pub struct SessionPoolController {
    config: PoolConfig,
    sessions: Arc<dyn SessionInitializer>,
    playlists: Arc<dyn PlaylistSource>,
    clock: Arc<dyn Clock>,
}

impl SessionPoolController {
    pub fn new(
        config: PoolConfig,
        sessions: Arc<dyn SessionInitializer>,
        playlists: Arc<dyn PlaylistSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sessions,
            playlists,
            clock,
        }
    }

    /// Run one reconciliation tick. Never fails: every collaborator error is
    /// logged, recorded as an effect and left for the next tick to heal.
    pub async fn tick(&self, state: SessionPoolState) -> TickOutcome<SessionPoolState, PoolEffect> {
        let now = self.clock.now();
        let desired = self
            .config
            .requirements
            .desired_volume(self.config.event_start, now);
        let mut url_list = state.url_list;
        let mut effects = vec![PoolEffect::Target {
            desired,
            tracked: url_list.len(),
        }];
        info!(desired, tracked = url_list.len(), "Desired session volume");

        let desired = desired as usize;
        if url_list.len() < desired {
            let missing = desired - url_list.len();
            for _ in 0..missing {
                match acquire_playback_url(
                    self.sessions.as_ref(),
                    self.playlists.as_ref(),
                    self.config.rendition_index,
                )
                .await
                {
                    Ok(url) => {
                        debug!(url = %url, "Added session to pool");
                        effects.push(PoolEffect::SessionCreated { url: url.clone() });
                        url_list.push(url);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to create a session");
                        effects.push(PoolEffect::SessionFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
        } else if url_list.len() > desired {
            let removed = url_list.len() - desired;
            url_list.truncate(desired);
            info!(removed, "Discarded newest sessions");
            effects.push(PoolEffect::Truncated { removed });
        }

        effects.extend(self.probe_all(&url_list).await);

        TickOutcome::new(
            SessionPoolState {
                url_list,
                timestamp: Some(now),
            },
            effects,
        )
    }

    async fn probe_all(&self, urls: &[String]) -> Vec<PoolEffect> {
        let playlists = &self.playlists;
        stream::iter(urls)
            .map(|url| async move {
                match playlists.probe(url).await {
                    Ok(()) => PoolEffect::Probed { url: url.clone() },
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to fetch the manifest");
                        PoolEffect::ProbeFailed {
                            url: url.clone(),
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .buffered(self.config.probe_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{Result, TailorError};
    use crate::playlist::Playlist;
    use crate::volume::GrowthPoint;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MASTER: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\n0.m3u8\n";

    /// Hands out sequentially numbered master playlists; fails the calls
    /// listed in `fail_on`.
    #[derive(Default)]
    struct CountingSessions {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl SessionInitializer for CountingSessions {
        async fn create_session(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&n) {
                return Err(TailorError::bootstrap("https://init", "HTTP 500"));
            }
            Ok(format!("https://emt.example.com/v1/master/s{n}/index.m3u8"))
        }
    }

    #[derive(Default)]
    struct RecordingPlaylists {
        probed: Mutex<Vec<String>>,
        broken: Vec<String>,
    }

    #[async_trait]
    impl PlaylistSource for RecordingPlaylists {
        async fn fetch(&self, url: &str) -> Result<Playlist> {
            Playlist::parse(url, MASTER.as_bytes())
        }

        async fn probe(&self, url: &str) -> Result<()> {
            self.probed.lock().push(url.to_string());
            if self.broken.iter().any(|b| b == url) {
                return Err(TailorError::http_status(
                    StatusCode::NOT_FOUND,
                    url,
                    "manifest probe",
                ));
            }
            Ok(())
        }
    }

    fn event_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn controller(
        volume: u32,
        sessions: Arc<CountingSessions>,
        playlists: Arc<RecordingPlaylists>,
    ) -> SessionPoolController {
        let requirements = SessionRequirements::linear(vec![GrowthPoint::new(0, volume)]);
        SessionPoolController::new(
            PoolConfig::new(requirements, event_start()),
            sessions,
            playlists,
            Arc::new(FixedClock::new(event_start() + chrono::Duration::seconds(30))),
        )
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://emt.example.com/old/{i}.m3u8")).collect()
    }

    #[tokio::test]
    async fn grows_pool_to_desired_volume() {
        let sessions = Arc::new(CountingSessions::default());
        let playlists = Arc::new(RecordingPlaylists::default());
        let pool = controller(5, sessions.clone(), playlists.clone());

        let outcome = pool
            .tick(SessionPoolState {
                url_list: urls(2),
                timestamp: None,
            })
            .await;

        assert_eq!(sessions.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.state.url_list.len(), 5);
        assert_eq!(outcome.state.url_list[..2], urls(2)[..]);
        assert_eq!(
            outcome.state.url_list[2],
            "https://emt.example.com/v1/master/s0/0.m3u8"
        );
        assert_eq!(
            outcome.state.timestamp,
            Some(event_start() + chrono::Duration::seconds(30))
        );
        assert_eq!(playlists.probed.lock().clone(), outcome.state.url_list);
        assert_eq!(outcome.effects[0], PoolEffect::Target { desired: 5, tracked: 2 });
    }

    #[tokio::test]
    async fn truncates_keeping_oldest() {
        let sessions = Arc::new(CountingSessions::default());
        let playlists = Arc::new(RecordingPlaylists::default());
        let pool = controller(2, sessions.clone(), playlists.clone());

        let outcome = pool
            .tick(SessionPoolState {
                url_list: urls(4),
                timestamp: None,
            })
            .await;

        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.state.url_list, urls(2));
        assert!(outcome.effects.contains(&PoolEffect::Truncated { removed: 2 }));
    }

    #[tokio::test]
    async fn bootstrap_failure_leaves_shortfall() {
        let sessions = Arc::new(CountingSessions {
            fail_on: vec![1],
            ..Default::default()
        });
        let playlists = Arc::new(RecordingPlaylists::default());
        let pool = controller(3, sessions.clone(), playlists);

        let outcome = pool.tick(SessionPoolState::default()).await;

        assert_eq!(sessions.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.state.url_list.len(), 2);
        assert_eq!(
            outcome
                .effects
                .iter()
                .filter(|e| matches!(e, PoolEffect::SessionFailed { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn probe_failure_keeps_url() {
        let sessions = Arc::new(CountingSessions::default());
        let existing = urls(2);
        let playlists = Arc::new(RecordingPlaylists {
            broken: vec![existing[0].clone()],
            ..Default::default()
        });
        let pool = controller(2, sessions, playlists);

        let outcome = pool
            .tick(SessionPoolState {
                url_list: existing.clone(),
                timestamp: None,
            })
            .await;

        assert_eq!(outcome.state.url_list, existing);
        assert!(matches!(
            &outcome.effects[1],
            PoolEffect::ProbeFailed { url, .. } if *url == existing[0]
        ));
        assert_eq!(outcome.effects[2], PoolEffect::Probed { url: existing[1].clone() });
    }

    #[tokio::test]
    async fn concurrent_probes_keep_order() {
        let sessions = Arc::new(CountingSessions::default());
        let playlists = Arc::new(RecordingPlaylists::default());
        let requirements = SessionRequirements::linear(vec![GrowthPoint::new(0, 4)]);
        let mut config = PoolConfig::new(requirements, event_start());
        config.probe_concurrency = 4;
        let pool = SessionPoolController::new(
            config,
            sessions,
            playlists,
            Arc::new(FixedClock::new(event_start())),
        );

        let outcome = pool
            .tick(SessionPoolState {
                url_list: urls(4),
                timestamp: None,
            })
            .await;

        let probed: Vec<String> = outcome
            .effects
            .iter()
            .filter_map(|e| match e {
                PoolEffect::Probed { url } => Some(url.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(probed, urls(4));
    }
}
