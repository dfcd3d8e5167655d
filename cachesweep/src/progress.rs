use crate::cleaner::CacheFolder;
use log::{log, Level};
use std::{fmt, path::PathBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A single progress event. The `Display` impl gives the line a user should see for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Anything shown so far belongs to an earlier run and can be cleared.
    Reset,
    CheckingForUpdate,
    UpToDate {
        version: String,
    },
    DownloadingUpdate {
        asset: String,
    },
    UpdateStaged {
        path: PathBuf,
    },
    UpdateFailed {
        reason: String,
    },
    LookingForInstall,
    FoundInstall {
        path: PathBuf,
    },
    InstallNotFound {
        reason: String,
    },
    CleaningFolders,
    FolderRemoved {
        folder: CacheFolder,
    },
    FolderFailed {
        folder: CacheFolder,
        reason: String,
    },
    CleanFinished,
}

impl Progress {
    /// Returns true for events that describe something going wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Progress::UpdateFailed { .. }
                | Progress::InstallNotFound { .. }
                | Progress::FolderFailed { .. }
        )
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Reset => Ok(()),
            Progress::CheckingForUpdate => write!(f, "Checking for updates..."),
            Progress::UpToDate { version } => write!(f, "✓ {version} is the latest version"),
            Progress::DownloadingUpdate { asset } => write!(f, "Downloading update {asset}..."),
            Progress::UpdateStaged { path } => write!(
                f,
                "✓ Update staged, restarting {}",
                path.display()
            ),
            Progress::UpdateFailed { reason } => write!(f, "❌ Update failed: {reason}"),
            Progress::LookingForInstall => write!(f, "Looking for FiveM installation..."),
            Progress::FoundInstall { path } => {
                write!(f, "✓ Found FiveM installation at: {}", path.display())
            }
            Progress::InstallNotFound { reason } => write!(f, "❌ {reason}"),
            Progress::CleaningFolders => write!(f, "\nCleaning cache folders:"),
            Progress::FolderRemoved { folder } => write!(f, "✓ Removed {folder}"),
            Progress::FolderFailed { folder, reason } => {
                write!(f, "❌ Error removing {folder}: {reason}")
            }
            Progress::CleanFinished => write!(f, "\n✨ Cache cleaning completed successfully!"),
        }
    }
}

/// Anything that can receive [`Progress`] events.
///
/// Reporters are called from whatever thread is doing the work, so an implementation that drives
/// a UI should hand the events off (see [`ChannelReporter`]) rather than touching the UI directly.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Progress);
}

impl<F> Reporter for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, event: Progress) {
        self(event);
    }
}

/// Sends every event to the `log` facade.
#[derive(Debug, Default)]
pub struct LogReporter;

impl LogReporter {
    // Failures are logged as errors, everything else as info. `Reset` has nothing to log.
    fn log_line(event: &Progress) -> Option<(Level, String)> {
        if *event == Progress::Reset {
            return None;
        }
        let level = if event.is_failure() {
            Level::Error
        } else {
            Level::Info
        };
        Some((level, event.to_string().trim_start().to_string()))
    }
}

impl Reporter for LogReporter {
    fn report(&self, event: Progress) {
        if let Some((level, line)) = Self::log_line(&event) {
            log!(level, "{line}");
        }
    }
}

/// Forwards events over a channel so that a single presentation thread can render them.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<Progress>,
}

impl ChannelReporter {
    /// Returns a new reporter and the receiving end of its channel. The receiver yields `None`
    /// once every clone of the reporter has been dropped.
    pub fn channel() -> (Self, UnboundedReceiver<Progress>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: Progress) {
        // If the receiver is gone then nobody is listening, which is fine.
        let _ = self.tx.send(event);
    }
}
