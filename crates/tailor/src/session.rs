//! Playback session bootstrap against the ad-stitcher's session-initialization
//! endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TailorError};
use crate::playlist::{Playlist, PlaylistSource, is_playlist_url, resolve_url, resolve_variant};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInitRequest<'a> {
    log_mode: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInitResponse {
    #[serde(default)]
    manifest_url: Option<String>,
}

/// Mints new playback sessions.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    /// Create one session and return its absolute manifest URL. No retries:
    /// a failure is reported and the next tick tries again.
    async fn create_session(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpSessionBootstrap {
    client: reqwest::Client,
    init_url: String,
    host_override: Option<String>,
}

impl HttpSessionBootstrap {
    pub fn new(
        client: reqwest::Client,
        init_url: impl Into<String>,
        host_override: Option<String>,
    ) -> Self {
        Self {
            client,
            init_url: init_url.into(),
            host_override: host_override.filter(|host| !host.is_empty()),
        }
    }
}

#[async_trait]
impl SessionInitializer for HttpSessionBootstrap {
    async fn create_session(&self) -> Result<String> {
        let response = self
            .client
            .post(&self.init_url)
            .json(&SessionInitRequest { log_mode: "DEBUG" })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TailorError::http_status(
                status,
                &self.init_url,
                "session initialization",
            ));
        }

        let body: SessionInitResponse = response
            .json()
            .await
            .map_err(|e| {
                TailorError::bootstrap(&self.init_url, format!("unreadable response: {e}"))
            })?;
        let manifest_url = body
            .manifest_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| TailorError::bootstrap(&self.init_url, "response has no manifestUrl"))?;

        let resolved =
            resolve_manifest_url(&manifest_url, self.host_override.as_deref(), &self.init_url);
        debug!(init_url = %self.init_url, manifest = %resolved, "Created playback session");
        Ok(resolved)
    }
}

/// Resolve the manifest URL returned by session initialization. With a host
/// override, relative URLs are anchored at `https://{host}`; otherwise at the
/// initialization URL itself.
pub fn resolve_manifest_url(manifest_url: &str, host_override: Option<&str>, init_url: &str) -> String {
    match host_override.filter(|host| !host.is_empty()) {
        Some(host) => resolve_url(&format!("https://{host}"), manifest_url),
        None => resolve_url(init_url, manifest_url),
    }
}

/// Bootstrap a session and narrow it down to a URL that serves a media
/// playlist. Master playlists are resolved to the rendition at
/// `rendition_index`.
pub async fn acquire_playback_url(
    sessions: &dyn SessionInitializer,
    playlists: &dyn PlaylistSource,
    rendition_index: usize,
) -> Result<String> {
    let manifest_url = sessions.create_session().await?;
    if !is_playlist_url(&manifest_url) {
        return Ok(manifest_url);
    }

    match playlists.fetch(&manifest_url).await? {
        Playlist::Master(master) => {
            let rendition = resolve_variant(&manifest_url, &master, rendition_index)?;
            info!(master = %manifest_url, rendition = %rendition, "Selected rendition for new session");
            Ok(rendition)
        }
        Playlist::Media(_) => Ok(manifest_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StaticSessions(Result<String>);

    #[async_trait]
    impl SessionInitializer for StaticSessions {
        async fn create_session(&self) -> Result<String> {
            match &self.0 {
                Ok(url) => Ok(url.clone()),
                Err(_) => Err(TailorError::bootstrap("https://init", "failed")),
            }
        }
    }

    #[derive(Default)]
    struct StaticPlaylists {
        bodies: HashMap<String, &'static str>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlaylistSource for StaticPlaylists {
        async fn fetch(&self, url: &str) -> Result<Playlist> {
            self.fetched.lock().push(url.to_string());
            match self.bodies.get(url) {
                Some(body) => Playlist::parse(url, body.as_bytes()),
                None => Err(TailorError::playlist_parse(url, "not found")),
            }
        }

        async fn probe(&self, _url: &str) -> Result<()> {
            Ok(())
        }
    }

    const MASTER: &str =
        "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=3000000\nhigh.m3u8\n";
    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nseg1.ts\n";

    #[test]
    fn host_override_forces_https_host() {
        assert_eq!(
            resolve_manifest_url(
                "/v1/master/abc/live/index.m3u8?aws.sessionId=42",
                Some("d111.cloudfront.net"),
                "http://ignored.example.com/v1/session/abc/live/index.m3u8"
            ),
            "https://d111.cloudfront.net/v1/master/abc/live/index.m3u8?aws.sessionId=42"
        );
    }

    #[test]
    fn without_override_resolves_against_init_url() {
        assert_eq!(
            resolve_manifest_url(
                "/v1/master/abc/live/index.m3u8",
                None,
                "https://emt.example.com/v1/session/abc/live/index.m3u8"
            ),
            "https://emt.example.com/v1/master/abc/live/index.m3u8"
        );
        assert_eq!(
            resolve_manifest_url("/a.m3u8", Some(""), "https://emt.example.com/v1/session"),
            "https://emt.example.com/a.m3u8"
        );
    }

    #[tokio::test]
    async fn master_result_is_resolved_to_rendition() {
        let master_url = "https://emt.example.com/v1/master/abc/index.m3u8";
        let playlists = StaticPlaylists {
            bodies: HashMap::from([(master_url.to_string(), MASTER)]),
            ..Default::default()
        };
        let sessions = StaticSessions(Ok(master_url.to_string()));

        let url = acquire_playback_url(&sessions, &playlists, 1).await.unwrap();
        assert_eq!(url, "https://emt.example.com/v1/master/abc/high.m3u8");
    }

    #[tokio::test]
    async fn media_result_is_used_directly() {
        let media_url = "https://emt.example.com/v1/manifest/abc/0.m3u8";
        let playlists = StaticPlaylists {
            bodies: HashMap::from([(media_url.to_string(), MEDIA)]),
            ..Default::default()
        };
        let sessions = StaticSessions(Ok(media_url.to_string()));

        let url = acquire_playback_url(&sessions, &playlists, 0).await.unwrap();
        assert_eq!(url, media_url);
    }

    #[tokio::test]
    async fn non_playlist_result_skips_fetch() {
        let playlists = StaticPlaylists::default();
        let sessions = StaticSessions(Ok("https://emt.example.com/v1/dash/abc/index.mpd".into()));

        let url = acquire_playback_url(&sessions, &playlists, 0).await.unwrap();
        assert!(url.ends_with("index.mpd"));
        assert!(playlists.fetched.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_rendition_is_no_variant() {
        let master_url = "https://emt.example.com/v1/master/abc/index.m3u8";
        let playlists = StaticPlaylists {
            bodies: HashMap::from([(master_url.to_string(), MASTER)]),
            ..Default::default()
        };
        let sessions = StaticSessions(Ok(master_url.to_string()));

        let err = acquire_playback_url(&sessions, &playlists, 7).await.unwrap_err();
        assert!(matches!(err, TailorError::NoVariant { available: 2, .. }));
    }

    #[tokio::test]
    async fn bootstrap_failure_propagates() {
        let playlists = StaticPlaylists::default();
        let sessions = StaticSessions(Err(TailorError::bootstrap("x", "y")));
        let err = acquire_playback_url(&sessions, &playlists, 0).await.unwrap_err();
        assert!(matches!(err, TailorError::Bootstrap { .. }));
    }
}
