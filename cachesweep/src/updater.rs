use crate::{
    error::{Result, SweepError},
    launcher::Launcher,
    progress::{Progress, Reporter},
    release::ReleaseChecker,
};
use log::{debug, info};
use reqwest::header::{HeaderValue, ACCEPT};
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process,
};
use url::Url;

#[cfg(target_family = "unix")]
use std::{fs::Permissions, os::unix::fs::PermissionsExt};

/// The name of the directory next to the running executable that updates are staged in.
pub const SCRATCH_DIR_NAME: &str = "temp_update";

// Downloads are written through a buffer of this size rather than held in memory.
pub(crate) const DOWNLOAD_BUFFER_SIZE: usize = 32 * 1024;

/// `Updater` replaces the running executable with the latest release, if it is not already the
/// latest. Use [`UpdaterBuilder`](crate::UpdaterBuilder) to create one.
#[derive(Debug)]
pub struct Updater {
    checker: ReleaseChecker,
    project: String,
    current_version: String,
    asset_name: String,
    exe_path: PathBuf,
    scratch_dir: PathBuf,
    launcher: Box<dyn Launcher>,
}

/// What [`Updater::run`] did.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The running executable is the latest release.
    UpToDate,
    /// The new executable has been downloaded and the helper that swaps it in is running. The
    /// caller should exit right away, since the helper waits for this process to be gone.
    Staged(StagedUpdate),
}

#[derive(Debug, PartialEq, Eq)]
pub struct StagedUpdate {
    pub downloaded: PathBuf,
    pub helper_script: PathBuf,
    pub exe_path: PathBuf,
}

impl Updater {
    pub(crate) fn new(
        checker: ReleaseChecker,
        project: String,
        current_version: String,
        asset_name: String,
        exe_path: PathBuf,
        scratch_dir: PathBuf,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            checker,
            project,
            current_version,
            asset_name,
            exe_path,
            scratch_dir,
            launcher,
        }
    }

    #[cfg(test)]
    pub(crate) fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Check for a newer release and stage it if there is one.
    ///
    /// Nothing is retried. If this returns an error, the running executable has not been touched
    /// and it is safe to carry on with it.
    ///
    /// # Errors
    ///
    /// * [`SweepError::Network`] or [`SweepError::Decode`] if the latest release can't be fetched
    ///   when resolving the asset.
    /// * [`SweepError::AssetNotFound`] if the latest release doesn't have our asset.
    /// * [`SweepError::Network`] if the download fails.
    /// * [`SweepError::Filesystem`] if the download or helper script can't be written, or the
    ///   helper can't be started.
    pub async fn run(&self, reporter: &dyn Reporter) -> Result<UpdateOutcome> {
        reporter.report(Progress::CheckingForUpdate);
        if !self
            .checker
            .check_version(&self.current_version, &self.project)
            .await
        {
            info!("{} is the latest release", self.current_version);
            reporter.report(Progress::UpToDate {
                version: self.current_version.clone(),
            });
            return Ok(UpdateOutcome::UpToDate);
        }

        reporter.report(Progress::DownloadingUpdate {
            asset: self.asset_name.clone(),
        });
        let url = self
            .checker
            .resolve_asset_url(&self.project, &self.asset_name)
            .await?;
        let downloaded = self.download_asset(&url).await?;

        let helper = HelperScript {
            exe_path: &self.exe_path,
            downloaded: &downloaded,
            parent_pid: process::id(),
        };
        let helper_script = helper.write_to(&self.scratch_dir)?;
        let (program, args) = HelperScript::command(&helper_script);
        self.launcher.launch(&program, &args)?;
        info!(
            "started {} to replace {}",
            helper_script.display(),
            self.exe_path.display()
        );

        reporter.report(Progress::UpdateStaged {
            path: self.exe_path.clone(),
        });
        Ok(UpdateOutcome::Staged(StagedUpdate {
            downloaded,
            helper_script,
            exe_path: self.exe_path.clone(),
        }))
    }

    async fn download_asset(&self, url: &Url) -> Result<PathBuf> {
        debug!("downloading asset from {url}");

        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            SweepError::filesystem(
                format!("failed to create {}", self.scratch_dir.display()),
                e,
            )
        })?;

        let mut resp = self
            .checker
            .client()
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/octet-stream"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SweepError::network(format!("failed to download asset from {url}"), e))?;

        let path = self.scratch_dir.join(&self.asset_name);
        debug!("download path is {}", path.display());
        let write_error = |e| {
            SweepError::filesystem(format!("failed to write to {}", path.display()), e)
        };

        let file = File::create(&path).map_err(write_error)?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
        while let Some(c) = resp.chunk().await.map_err(|e| {
            SweepError::network(
                format!("failed to read chunk while downloading asset from {url}"),
                e,
            )
        })? {
            writer.write_all(c.as_ref()).map_err(write_error)?;
        }
        writer
            .into_inner()
            .map_err(|e| write_error(e.into_error()))?
            .sync_all()
            .map_err(write_error)?;

        #[cfg(target_family = "unix")]
        fs::set_permissions(&path, Permissions::from_mode(0o755)).map_err(write_error)?;

        Ok(path)
    }
}

/// The script that swaps a downloaded executable in for the running one.
///
/// A running executable can't be replaced on Windows, so this is done by a separate process that
/// waits until the process with `parent_pid` is gone, replaces the executable, starts it, and
/// deletes itself.
#[derive(Debug)]
pub(crate) struct HelperScript<'a> {
    pub(crate) exe_path: &'a Path,
    pub(crate) downloaded: &'a Path,
    pub(crate) parent_pid: u32,
}

impl HelperScript<'_> {
    #[cfg(target_os = "windows")]
    pub(crate) const FILE_NAME: &'static str = "update.bat";
    #[cfg(not(target_os = "windows"))]
    pub(crate) const FILE_NAME: &'static str = "update.sh";

    pub(crate) fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::FILE_NAME);
        debug!("writing update helper to {}", path.display());
        fs::write(&path, self.render(&path)).map_err(|e| {
            SweepError::filesystem(
                format!("failed to create update script at {}", path.display()),
                e,
            )
        })?;
        Ok(path)
    }

    /// The program and arguments that run the script at `path`.
    #[cfg(target_os = "windows")]
    pub(crate) fn command(path: &Path) -> (PathBuf, Vec<OsString>) {
        (
            PathBuf::from("cmd"),
            vec![OsString::from("/C"), path.as_os_str().to_os_string()],
        )
    }

    #[cfg(not(target_os = "windows"))]
    pub(crate) fn command(path: &Path) -> (PathBuf, Vec<OsString>) {
        (PathBuf::from("sh"), vec![path.as_os_str().to_os_string()])
    }

    #[cfg(target_os = "windows")]
    pub(crate) fn render(&self, script_path: &Path) -> String {
        let pid = self.parent_pid;
        let exe = batch_escape(self.exe_path);
        let downloaded = batch_escape(self.downloaded);
        let script = batch_escape(script_path);
        format!(
            r#"@echo off
:wait
tasklist /FI "PID eq {pid}" /NH 2>nul | find " {pid} " >nul
if not errorlevel 1 (
    timeout /t 1 /nobreak >nul
    goto wait
)
del /F /Q "{exe}"
move /Y "{downloaded}" "{exe}"
start "" "{exe}"
del "{script}"
"#
        )
    }

    #[cfg(not(target_os = "windows"))]
    pub(crate) fn render(&self, script_path: &Path) -> String {
        let pid = self.parent_pid;
        let exe = sh_quote(self.exe_path);
        let downloaded = sh_quote(self.downloaded);
        let script = sh_quote(script_path);
        format!(
            r#"#!/bin/sh
while kill -0 {pid} 2>/dev/null; do
    sleep 1
done
rm -f {exe}
mv {downloaded} {exe}
{exe} &
rm -f {script}
"#
        )
    }
}

// cmd expands `%` even inside double quotes.
#[cfg(any(target_os = "windows", test))]
fn batch_escape(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

#[cfg(not(target_os = "windows"))]
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}
