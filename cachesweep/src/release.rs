use crate::error::{Result, SweepError};
use log::{debug, warn};
use reqwest::{
    header::{HeaderValue, ACCEPT},
    Client, Response,
};
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use url::Url;

pub(crate) static DEFAULT_API_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://api.github.com").unwrap());

// The feed is checked on every launch, so a slow or unreachable API must not hold up the sweep.
pub(crate) const FEED_TIMEOUT: Duration = Duration::from_secs(5);

/// The subset of a GitHub release that we care about.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Release {
    /// The release's tag. This is treated as an opaque label and only ever compared for equality.
    #[serde(rename = "tag_name")]
    pub tag: String,
    pub assets: Vec<Asset>,
}

/// A downloadable file attached to a [`Release`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub url: Url,
}

impl Release {
    /// Returns the asset whose name is exactly `name`, if there is one.
    pub fn asset_named(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// `ReleaseChecker` talks to the GitHub releases API to find out what the latest published
/// release of a project looks like.
#[derive(Debug, Clone)]
pub struct ReleaseChecker {
    api_base_url: Url,
    client: Client,
}

impl ReleaseChecker {
    /// Create a new checker which sends its requests to `api_base_url`, which should be something
    /// like `https://api.github.com`.
    pub fn new(client: Client, api_base_url: Url) -> Self {
        Self {
            api_base_url,
            client,
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch the latest release for `project`, which must be in `owner/repo` form.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Network`] if the request fails, times out, or gets a non-success
    /// status, and [`SweepError::Decode`] if the body is not a release. If the checker was
    /// created with a URL that can't have a path, like a `mailto:` URL, this returns
    /// [`SweepError::InvalidBaseUrl`] without sending anything.
    pub async fn fetch_latest_release(&self, project: &str) -> Result<Release> {
        let url = self.release_info_url(project)?;
        debug!("Getting release info from `{url}`");

        let resp = self.make_release_info_request(&url).await?;
        let body = resp.bytes().await.map_err(|e| {
            SweepError::network(format!("failed to read release data from {url}"), e)
        })?;

        let release = serde_json::from_slice::<Release>(&body).map_err(|e| SweepError::Decode {
            url: url.to_string(),
            source: e,
        })?;
        debug!(
            "latest release of {project} is {} with {} assets",
            release.tag,
            release.assets.len(),
        );

        Ok(release)
    }

    /// Returns `true` if `current` is not the latest release of `project`.
    ///
    /// This is a plain string comparison. Any tag other than `current`, including an older one,
    /// counts as newer. If the latest release cannot be fetched at all, this also returns `true`.
    /// Callers that go on to download something will hit the same network problem there and can
    /// deal with it as an error.
    pub async fn check_version(&self, current: &str, project: &str) -> bool {
        match self.fetch_latest_release(project).await {
            Ok(release) => {
                debug!("current version is {current}, latest is {}", release.tag);
                release.tag != current
            }
            Err(e) => {
                warn!("Could not determine the latest release, assuming {current} is out of date: {e}");
                true
            }
        }
    }

    /// Find the download URL of the asset named `asset_name` in the latest release of `project`.
    ///
    /// # Errors
    ///
    /// Everything [`ReleaseChecker::fetch_latest_release`] can return, plus
    /// [`SweepError::AssetNotFound`] if no asset has exactly that name.
    pub async fn resolve_asset_url(&self, project: &str, asset_name: &str) -> Result<Url> {
        let release = self.fetch_latest_release(project).await?;
        match release.asset_named(asset_name) {
            Some(asset) => Ok(asset.url.clone()),
            None => Err(SweepError::AssetNotFound {
                name: asset_name.to_string(),
                tag: release.tag,
            }),
        }
    }

    fn release_info_url(&self, project: &str) -> Result<Url> {
        let mut url = self.api_base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SweepError::InvalidBaseUrl {
                url: self.api_base_url.to_string(),
            })?
            .push("repos")
            .extend(project.split('/'))
            .extend(&["releases", "latest"]);
        Ok(url)
    }

    async fn make_release_info_request(&self, url: &Url) -> Result<Response> {
        let context = || format!("failed to fetch release data from {url}");

        let resp = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .map_err(|e| SweepError::network(context(), e))?;

        resp.error_for_status()
            .map_err(|e| SweepError::network(context(), e))
    }
}
