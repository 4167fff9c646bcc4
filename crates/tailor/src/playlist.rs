//! Playlist access: fetching, parsing and URL resolution for HLS manifests.

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, parse_playlist_res};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Result, TailorError};

const PLAYLIST_SUFFIX: &str = ".m3u8";

#[derive(Debug, Clone)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

impl Playlist {
    pub fn parse(url: &str, bytes: &[u8]) -> Result<Self> {
        match parse_playlist_res(bytes) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => Ok(Self::Master(pl)),
            Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => Ok(Self::Media(pl)),
            Err(e) => Err(TailorError::playlist_parse(url, e.to_string())),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master(_))
    }
}

/// Read access to live manifests.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// GET and parse the playlist at `url`.
    async fn fetch(&self, url: &str) -> Result<Playlist>;

    /// GET the manifest at `url` and discard the body. Used to keep a
    /// simulated viewer session alive.
    async fn probe(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PlaylistClient {
    client: reqwest::Client,
}

impl PlaylistClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_bytes(&self, url: &str, operation: &'static str) -> Result<bytes::Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TailorError::http_status(status, url, operation));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl PlaylistSource for PlaylistClient {
    async fn fetch(&self, url: &str) -> Result<Playlist> {
        let body = self.get_bytes(url, "playlist fetch").await?;
        trace!(url = %url, bytes = body.len(), "Fetched playlist");
        Playlist::parse(url, &body)
    }

    async fn probe(&self, url: &str) -> Result<()> {
        let body = self.get_bytes(url, "manifest probe").await?;
        trace!(url = %url, bytes = body.len(), "Probed manifest");
        Ok(())
    }
}

/// Resolve `reference` against `base`. A reference that cannot be resolved
/// is returned unchanged.
pub fn resolve_url(base: &str, reference: &str) -> String {
    match Url::parse(base).and_then(|base_url| base_url.join(reference)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            warn!(base = %base, reference = %reference, error = %e, "Failed to resolve URL");
            reference.to_string()
        }
    }
}

/// Absolute URL of the `index`-th variant of `playlist`.
pub fn resolve_variant(master_url: &str, playlist: &MasterPlaylist, index: usize) -> Result<String> {
    let variant = playlist
        .variants
        .get(index)
        .ok_or_else(|| TailorError::NoVariant {
            url: master_url.to_string(),
            index,
            available: playlist.variants.len(),
        })?;
    let resolved = resolve_url(master_url, &variant.uri);
    debug!(master = %master_url, index, variant = %resolved, "Resolved rendition");
    Ok(resolved)
}

/// Whether `url` points at an HLS playlist resource (path ends in `.m3u8`,
/// ignoring any query string).
pub fn is_playlist_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().ends_with(PLAYLIST_SUFFIX),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .is_some_and(|path| path.ends_with(PLAYLIST_SUFFIX)),
    }
}
