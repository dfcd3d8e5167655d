use crate::{
    error::Result,
    launcher::Launcher,
    locator::{Installation, Locator, RegistrySource},
    progress::{Progress, Reporter},
};
use log::{debug, info, warn};
use std::{
    fs, io,
    sync::atomic::{AtomicBool, Ordering},
};

/// The folders under `FiveM.app/data` that hold caches, in the order they are removed.
#[derive(
    strum::AsRefStr, Clone, Copy, Debug, strum::Display, PartialEq, Eq, strum::VariantNames,
)]
pub enum CacheFolder {
    #[strum(serialize = "cache")]
    Cache,
    #[strum(serialize = "server-cache")]
    ServerCache,
    #[strum(serialize = "server-cache-priv")]
    ServerCachePriv,
}

impl CacheFolder {
    pub const ALL: [CacheFolder; 3] = [
        CacheFolder::Cache,
        CacheFolder::ServerCache,
        CacheFolder::ServerCachePriv,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FolderStatus {
    /// The folder is gone, either because we removed it or because it was never there.
    Removed,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderOutcome {
    pub folder: CacheFolder,
    pub status: FolderStatus,
}

/// What happened to each cache folder during a sweep, in [`CacheFolder::ALL`] order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub outcomes: Vec<FolderOutcome>,
}

impl CleanReport {
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FolderOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FolderStatus::Failed(_)))
    }
}

/// Remove every [`CacheFolder`] under the installation's data directory.
///
/// A failure to remove one folder is recorded in the report and does not stop the others from
/// being removed.
pub fn clean(installation: &Installation, reporter: &dyn Reporter) -> CleanReport {
    let data_dir = installation.data_dir();
    reporter.report(Progress::CleaningFolders);

    let mut report = CleanReport::default();
    for folder in CacheFolder::ALL {
        let path = data_dir.join(folder.as_ref());
        debug!("removing {}", path.display());

        let status = match fs::remove_dir_all(&path) {
            Ok(()) => FolderStatus::Removed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist", path.display());
                FolderStatus::Removed
            }
            Err(e) => {
                warn!("could not remove {}: {e}", path.display());
                FolderStatus::Failed(e.to_string())
            }
        };
        reporter.report(match &status {
            FolderStatus::Removed => Progress::FolderRemoved { folder },
            FolderStatus::Failed(reason) => Progress::FolderFailed {
                folder,
                reason: reason.clone(),
            },
        });
        report.outcomes.push(FolderOutcome { folder, status });
    }

    reporter.report(Progress::CleanFinished);
    report
}

/// Tracks whether a sweep is in progress. Moving from idle to running is a single atomic
/// compare-and-swap, so two triggers can't both win.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

/// Held for the duration of a sweep. Dropping it makes the guard idle again.
#[derive(Debug)]
pub struct RunToken<'a> {
    guard: &'a RunGuard,
}

impl RunGuard {
    /// Returns a token if the guard was idle, or `None` if something else is already running.
    pub fn try_start(&self) -> Option<RunToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep was already running, so this one did nothing.
    AlreadyRunning,
    Cleaned {
        installation: Installation,
        report: CleanReport,
    },
}

/// `Sweeper` runs the locate-then-clean sequence. Only one sweep can run at a time; the
/// installation is looked up again on every sweep.
#[derive(Debug)]
pub struct Sweeper<R> {
    locator: Locator<R>,
    guard: RunGuard,
}

impl<R: RegistrySource> Sweeper<R> {
    pub fn new(locator: Locator<R>) -> Self {
        Self {
            locator,
            guard: RunGuard::default(),
        }
    }

    /// Find the install and clean its cache folders. If a sweep is already in progress, this
    /// returns [`SweepOutcome::AlreadyRunning`] right away without reporting anything.
    ///
    /// # Errors
    ///
    /// Returns the locator's error if the install can't be found. Nothing is removed in that case.
    pub fn sweep(&self, reporter: &dyn Reporter) -> Result<SweepOutcome> {
        let Some(_token) = self.guard.try_start() else {
            debug!("a sweep is already running");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        reporter.report(Progress::Reset);
        reporter.report(Progress::LookingForInstall);
        let installation = match self.locator.detect() {
            Ok(i) => i,
            Err(e) => {
                reporter.report(Progress::InstallNotFound {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        reporter.report(Progress::FoundInstall {
            path: installation.bundle_dir().to_path_buf(),
        });

        let report = clean(&installation, reporter);
        Ok(SweepOutcome::Cleaned {
            installation,
            report,
        })
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }
}

/// Asks the user whether FiveM should be started again once the sweep is done.
pub trait RelaunchPrompt {
    fn confirm(&self, installation: &Installation) -> bool;
}

impl<F> RelaunchPrompt for F
where
    F: Fn(&Installation) -> bool,
{
    fn confirm(&self, installation: &Installation) -> bool {
        self(installation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relaunch {
    Started,
    Declined,
}

impl Relaunch {
    /// The status the process should exit with after this decision.
    pub fn exit_code(self) -> i32 {
        match self {
            Relaunch::Started => 0,
            Relaunch::Declined => 1,
        }
    }
}

/// Ask `prompt` whether to start the installation's executable, and start it if so.
///
/// # Errors
///
/// Returns the launcher's error if the executable could not be started.
pub fn relaunch(
    installation: &Installation,
    prompt: &dyn RelaunchPrompt,
    launcher: &dyn Launcher,
) -> Result<Relaunch> {
    if !prompt.confirm(installation) {
        info!("not starting {}", installation.executable().display());
        return Ok(Relaunch::Declined);
    }

    launcher.launch(installation.executable(), &[])?;
    info!("started {}", installation.executable().display());
    Ok(Relaunch::Started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SweepError,
        launcher::tests::RecordingLauncher,
        locator::{tests::FakeRegistry, BUNDLE_DIR, EXE_NAME},
        progress::tests::Recorder,
    };
    use std::{
        path::{Path, PathBuf},
        sync::{Barrier, Mutex},
    };
    use strum::VariantNames;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        td: TempDir,
        sweeper: Sweeper<FakeRegistry>,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let td = tempdir()?;
            fs::create_dir_all(td.path().join(BUNDLE_DIR).join("data"))?;
            let command = format!("\"{}\" \"%1\"", td.path().join(EXE_NAME).display());
            let sweeper = Sweeper::new(Locator::new(FakeRegistry(Some(command))));
            Ok(Self { td, sweeper })
        }

        fn data_dir(&self) -> PathBuf {
            self.td.path().join(BUNDLE_DIR).join("data")
        }

        fn installation(&self) -> anyhow::Result<Installation> {
            Ok(self.sweeper.locator.detect()?)
        }
    }

    fn populate(dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir.join("db"))?;
        fs::write(dir.join("db").join("index.bin"), [0u8; 64])?;
        fs::write(dir.join("entry"), "cached")?;
        Ok(())
    }

    fn ignore(_: Progress) {}

    #[test]
    fn cache_folder_names() {
        assert_eq!(
            CacheFolder::ALL.map(|f| f.to_string()),
            ["cache", "server-cache", "server-cache-priv"],
        );
        assert_eq!(
            CacheFolder::VARIANTS,
            &["cache", "server-cache", "server-cache-priv"],
        );
    }

    #[test]
    fn clean_removes_every_cache_folder() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        for folder in CacheFolder::ALL {
            populate(&f.data_dir().join(folder.as_ref()))?;
        }
        fs::create_dir_all(f.data_dir().join("game-storage"))?;

        let recorder = Recorder::default();
        let report = clean(&f.installation()?, &recorder);

        assert!(report.is_success());
        assert_eq!(
            report.outcomes,
            CacheFolder::ALL
                .iter()
                .map(|&folder| FolderOutcome {
                    folder,
                    status: FolderStatus::Removed,
                })
                .collect::<Vec<_>>(),
        );
        for folder in CacheFolder::ALL {
            assert!(
                !f.data_dir().join(folder.as_ref()).exists(),
                "{folder} is gone"
            );
        }
        assert!(
            f.data_dir().join("game-storage").is_dir(),
            "non-cache folders are left alone"
        );
        assert_eq!(
            recorder.events(),
            vec![
                Progress::CleaningFolders,
                Progress::FolderRemoved {
                    folder: CacheFolder::Cache
                },
                Progress::FolderRemoved {
                    folder: CacheFolder::ServerCache
                },
                Progress::FolderRemoved {
                    folder: CacheFolder::ServerCachePriv
                },
                Progress::CleanFinished,
            ],
        );

        Ok(())
    }

    #[test]
    fn clean_when_nothing_is_cached() -> anyhow::Result<()> {
        let f = Fixture::new()?;

        let report = clean(&f.installation()?, &ignore);

        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), CacheFolder::ALL.len());

        Ok(())
    }

    #[test]
    fn clean_is_idempotent() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        populate(&f.data_dir().join("server-cache"))?;
        let installation = f.installation()?;

        let first = clean(&installation, &ignore);
        let second = clean(&installation, &ignore);
        let third = clean(&installation, &ignore);

        assert!(first.is_success());
        assert_eq!(first, second);
        assert_eq!(second, third);

        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn clean_continues_past_failures() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        populate(&f.data_dir().join("cache"))?;
        // `remove_dir_all` refuses to remove a plain file.
        fs::write(f.data_dir().join("server-cache"), "not a directory")?;
        populate(&f.data_dir().join("server-cache-priv"))?;

        let recorder = Recorder::default();
        let report = clean(&f.installation()?, &recorder);

        assert!(!report.is_success());
        assert_eq!(
            report.failures().map(|o| o.folder).collect::<Vec<_>>(),
            vec![CacheFolder::ServerCache],
        );
        assert_eq!(report.outcomes[0].status, FolderStatus::Removed);
        assert_eq!(report.outcomes[2].status, FolderStatus::Removed);
        assert!(!f.data_dir().join("server-cache-priv").exists());

        let seen = recorder.events();
        assert!(
            matches!(
                &seen[2],
                Progress::FolderFailed {
                    folder: CacheFolder::ServerCache,
                    ..
                }
            ),
            "{seen:?}",
        );
        assert_eq!(seen.last(), Some(&Progress::CleanFinished));

        Ok(())
    }

    #[test]
    fn sweep() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        populate(&f.data_dir().join("cache"))?;

        let recorder = Recorder::default();
        match f.sweeper.sweep(&recorder)? {
            SweepOutcome::Cleaned {
                installation,
                report,
            } => {
                assert_eq!(installation.bundle_dir(), f.td.path().join(BUNDLE_DIR));
                assert_eq!(installation.executable(), f.td.path().join(EXE_NAME));
                assert_eq!(report.outcomes.len(), 3);
                assert!(report.is_success());
            }
            SweepOutcome::AlreadyRunning => panic!("expected the sweep to run"),
        }
        assert!(!f.sweeper.is_running());
        assert!(!f.data_dir().join("cache").exists());

        let seen = recorder.events();
        assert_eq!(
            seen[..3],
            [
                Progress::Reset,
                Progress::LookingForInstall,
                Progress::FoundInstall {
                    path: f.td.path().join(BUNDLE_DIR),
                },
            ],
        );

        Ok(())
    }

    #[test]
    fn sweep_without_install_removes_nothing() -> anyhow::Result<()> {
        let td = tempdir()?;
        let cache = td.path().join(BUNDLE_DIR).join("cache");
        populate(&cache)?;
        let command = format!("\"{}\"", td.path().join(EXE_NAME).display());
        let sweeper = Sweeper::new(Locator::new(FakeRegistry(Some(command))));

        let recorder = Recorder::default();
        let res = sweeper.sweep(&recorder);
        assert!(matches!(res, Err(SweepError::NotFound { .. })), "{res:?}");
        assert!(cache.is_dir());
        assert!(!sweeper.is_running(), "a failed sweep releases the guard");

        let seen = recorder.events();
        assert!(seen.last().is_some_and(Progress::is_failure), "{seen:?}");
        assert!(!seen.contains(&Progress::CleaningFolders));

        Ok(())
    }

    #[test]
    fn run_guard() {
        let guard = RunGuard::default();
        assert!(!guard.is_running());

        let token = guard.try_start();
        assert!(token.is_some());
        assert!(guard.is_running());
        assert!(guard.try_start().is_none(), "second start is refused");

        drop(token);
        assert!(!guard.is_running());
        assert!(guard.try_start().is_some(), "can start again once idle");
    }

    #[test]
    fn sweep_while_running_is_a_no_op() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        populate(&f.data_dir().join("cache"))?;
        let threads = 8;
        let barrier = Barrier::new(threads);

        // Hold the guard so that every thread sees a sweep in progress.
        let token = f.sweeper.guard.try_start();
        assert!(token.is_some());
        let outcomes = std::thread::scope(|s| {
            let handles = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        let recorder = Recorder::default();
                        barrier.wait();
                        let outcome = f.sweeper.sweep(&recorder);
                        (outcome, recorder.events())
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        drop(token);

        for (outcome, events) in outcomes {
            assert_eq!(outcome?, SweepOutcome::AlreadyRunning);
            assert!(events.is_empty(), "{events:?}");
        }
        assert!(f.data_dir().join("cache").is_dir());

        assert!(matches!(
            f.sweeper.sweep(&ignore)?,
            SweepOutcome::Cleaned { .. }
        ));
        assert!(!f.data_dir().join("cache").exists());

        Ok(())
    }

    #[test]
    fn relaunch_when_confirmed() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        let installation = f.installation()?;
        let launcher = RecordingLauncher::default();

        let asked = Mutex::new(vec![]);
        let prompt = |i: &Installation| {
            asked.lock().unwrap().push(i.executable().to_path_buf());
            true
        };
        let decision = relaunch(&installation, &prompt, &launcher)?;

        assert_eq!(decision, Relaunch::Started);
        assert_eq!(decision.exit_code(), 0);
        assert_eq!(*asked.lock().unwrap(), vec![f.td.path().join(EXE_NAME)]);
        assert_eq!(
            *launcher.launched.lock().unwrap(),
            vec![(f.td.path().join(EXE_NAME), Vec::<std::ffi::OsString>::new())],
        );

        Ok(())
    }

    #[test]
    fn relaunch_when_declined() -> anyhow::Result<()> {
        let f = Fixture::new()?;
        let launcher = RecordingLauncher::default();

        let decision = relaunch(&f.installation()?, &|_: &Installation| false, &launcher)?;

        assert_eq!(decision, Relaunch::Declined);
        assert_ne!(decision.exit_code(), 0);
        assert!(launcher.launched.lock().unwrap().is_empty());

        Ok(())
    }
}
