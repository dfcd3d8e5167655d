/// The `builder` module contains the `UpdaterBuilder` struct which is used to create an `Updater`
/// instance.
use crate::{
    launcher::{DetachedLauncher, Launcher},
    release::{ReleaseChecker, DEFAULT_API_BASE_URL, FEED_TIMEOUT},
    updater::{Updater, SCRATCH_DIR_NAME},
};
use anyhow::{anyhow, Result};
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client,
};
use std::{
    env,
    path::{Path, PathBuf},
};
use url::Url;

/// `UpdaterBuilder` is used to create an [`Updater`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct UpdaterBuilder<'a> {
    project: Option<&'a str>,
    current_version: Option<&'a str>,
    asset_name: Option<&'a str>,
    exe_path: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    api_base_url: Option<&'a str>,
    launcher: Option<Box<dyn Launcher>>,
}

impl<'a> UpdaterBuilder<'a> {
    /// Returns a new empty `UpdaterBuilder`.
    #[must_use]
    pub fn new() -> Self {
        UpdaterBuilder::default()
    }

    /// Set the GitHub project that releases are published under, like `houseabsolute/cachesweep`.
    /// This is required.
    #[must_use]
    pub fn project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    /// Set the version of the running executable. This is compared to the latest release's tag
    /// as-is, so it needs to be spelled the same way the tags are, e.g. `v1.0.0`. This is
    /// required.
    #[must_use]
    pub fn current_version(mut self, version: &'a str) -> Self {
        self.current_version = Some(version);
        self
    }

    /// Set the name of the release asset that contains the new executable. This is required.
    #[must_use]
    pub fn asset_name(mut self, name: &'a str) -> Self {
        self.asset_name = Some(name);
        self
    }

    /// Set the path of the executable to replace. Defaults to the running executable.
    #[must_use]
    pub fn exe_path<P: AsRef<Path>>(mut self, exe_path: P) -> Self {
        self.exe_path = Some(exe_path.as_ref().to_path_buf());
        self
    }

    /// Set the directory that downloads are staged in. Defaults to a `temp_update` directory next
    /// to the executable. It will be created if it doesn't exist.
    #[must_use]
    pub fn scratch_dir<P: AsRef<Path>>(mut self, scratch_dir: P) -> Self {
        self.scratch_dir = Some(scratch_dir.as_ref().to_path_buf());
        self
    }

    /// Set the base URL for the GitHub API. This is useful for testing or if you publish releases
    /// on an Enterprise version of GitHub. This should be something like
    /// `https://github.my-corp.example.com/api/v3`.
    #[must_use]
    pub fn api_base_url(mut self, api_base_url: &'a str) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Set what is used to start the helper script. Defaults to [`DetachedLauncher`].
    #[must_use]
    pub fn launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Builds a new [`Updater`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if a required option is missing, if the project is not in `owner/repo`
    /// form, if the API base URL can't be parsed, or if the path of the running executable can't
    /// be determined.
    pub fn build(self) -> Result<Updater> {
        let project = parse_project_name(
            self.project
                .ok_or_else(|| anyhow!("You must set a project"))?,
        )?;
        let current_version = self
            .current_version
            .ok_or_else(|| anyhow!("You must set the current version"))?;
        let asset_name = self
            .asset_name
            .ok_or_else(|| anyhow!("You must set an asset name"))?;

        let exe_path = match self.exe_path {
            Some(p) => p,
            None => env::current_exe()
                .map_err(|e| anyhow!("could not find path for current executable: {e}"))?,
        };
        let scratch_dir = match self.scratch_dir {
            Some(d) => d,
            None => exe_path
                .parent()
                .ok_or_else(|| anyhow!("executable path `{}` has no parent", exe_path.display()))?
                .join(SCRATCH_DIR_NAME),
        };
        debug!(
            "updating {} from {project}, staging downloads in {}",
            exe_path.display(),
            scratch_dir.display(),
        );

        let api_base_url = match self.api_base_url {
            Some(u) => Url::parse(u)?,
            None => DEFAULT_API_BASE_URL.clone(),
        };
        if api_base_url.cannot_be_a_base() {
            return Err(anyhow!("`{api_base_url}` cannot be used as an API base URL"));
        }

        Ok(Updater::new(
            ReleaseChecker::new(reqwest_client()?, api_base_url),
            project,
            current_version.to_string(),
            asset_name.to_string(),
            exe_path,
            scratch_dir,
            self.launcher.unwrap_or_else(|| Box::new(DetachedLauncher)),
        ))
    }
}

fn parse_project_name(project: &str) -> Result<String> {
    let parts = project.split('/').collect::<Vec<_>>();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(anyhow!(
            "could not parse org and repo name from `{project}`, expected something like `owner/repo`"
        ));
    }

    debug!("Parsed project {project} = {} / {}", parts[0], parts[1]);
    Ok(project.to_string())
}

pub(crate) fn reqwest_client() -> Result<Client> {
    let builder = Client::builder().gzip(true).connect_timeout(FEED_TIMEOUT);

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("cachesweep version {}", super::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}
