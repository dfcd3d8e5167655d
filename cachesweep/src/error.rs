use std::{io, path::PathBuf};
use thiserror::Error;

/// The errors that can be returned by this crate.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum SweepError {
    /// The protocol handler key or its default value could not be read.
    #[error("error reading registry key `{key}`: {source}")]
    Registry {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The registry pointed somewhere, but there is no FiveM install there.
    #[error("no valid FiveM installation found at {}", path.display())]
    NotFound { path: PathBuf },

    /// A request to the release feed or an asset download failed.
    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The release feed returned something that isn't a release.
    #[error("failed to decode release data from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The API base URL can't have a path appended to it, e.g. a `mailto:` URL.
    #[error("`{url}` cannot be used as an API base URL")]
    InvalidBaseUrl { url: String },

    /// The latest release has no asset with the expected name.
    #[error("asset `{name}` not found in release {tag}")]
    AssetNotFound { name: String, tag: String },

    /// Creating, writing, or removing something on disk failed.
    #[error("{context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },
}

pub(crate) type Result<T, E = SweepError> = std::result::Result<T, E>;

impl SweepError {
    pub(crate) fn network(context: impl Into<String>, source: reqwest::Error) -> Self {
        SweepError::Network {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn filesystem(context: impl Into<String>, source: io::Error) -> Self {
        SweepError::Filesystem {
            context: context.into(),
            source,
        }
    }
}
