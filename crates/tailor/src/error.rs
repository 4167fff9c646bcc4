use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, TailorError>;

#[derive(Debug, thiserror::Error)]
pub enum TailorError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("failed to parse playlist from {url}: {reason}")]
    PlaylistParse { url: String, reason: String },

    #[error("no usable variant at index {index} in master playlist {url} ({available} available)")]
    NoVariant {
        url: String,
        index: usize,
        available: usize,
    },

    #[error("session bootstrap via {url} failed: {reason}")]
    Bootstrap { url: String, reason: String },

    #[error("prefetch reservation {operation} failed for `{name}`: {reason}")]
    Reservation {
        operation: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl TailorError {
    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn playlist_parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PlaylistParse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn bootstrap(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bootstrap {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn reservation(
        operation: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Reservation {
            operation,
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Transport failures, non-2xx responses and unparsable playlists.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::HttpStatus { .. } | Self::PlaylistParse { .. }
        )
    }

    /// Only malformed configuration is fatal. Everything else is absorbed at
    /// the tick boundary and retried on the next scheduled tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
