//! A library for clearing out FiveM's cache folders and keeping the tool that does it up to date.
//!
//! This project also ships a CLI tool named `cachesweep`, which runs the whole sequence: update
//! itself if a newer release exists, find the FiveM install, remove its cache folders, and offer to
//! start FiveM again.
//!
//! ## Finding FiveM
//!
//! FiveM registers itself as the handler for `fivem://` links. The command Windows runs for those
//! links is stored in the registry under
//! `HKEY_CLASSES_ROOT\FiveM.ProtocolHandler\shell\open\command`, and looks like
//! `"C:\Users\me\AppData\Local\FiveM\FiveM.exe" "%1"`. The [`Locator`] takes the quoted executable
//! path from that command, replaces `FiveM.exe` with `FiveM.app`, and checks that the result
//! contains a `data` directory. The registry is only read on Windows. On other platforms
//! [`HostRegistry`] always returns an error, but any other [`RegistrySource`] can be plugged in.
//!
//! ## Cleaning
//!
//! The [`Sweeper`] finds the install and then removes `cache`, `server-cache`, and
//! `server-cache-priv` under `FiveM.app/data`. Folders that don't exist count as removed, and a
//! folder that can't be removed doesn't stop the rest. Only one sweep runs at a time. Starting
//! another while one is in progress does nothing.
//!
//! ```ignore
//! use cachesweep::{HostRegistry, Locator, LogReporter, SweepOutcome, Sweeper};
//!
//! let sweeper = Sweeper::new(Locator::new(HostRegistry));
//! if let SweepOutcome::Cleaned { report, .. } = sweeper.sweep(&LogReporter)? {
//!     println!("removed everything: {}", report.is_success());
//! }
//! ```
//!
//! ## Updating
//!
//! The [`Updater`] compares the running version with the tag of the latest GitHub release. If they
//! differ at all, it downloads the named release asset next to the running executable and starts a
//! small helper script. The helper waits for the current process to exit, moves the new executable
//! into place, and starts it. The caller is expected to exit as soon as [`Updater::run`] returns
//! [`UpdateOutcome::Staged`].
//!
//! ```ignore
//! use cachesweep::{LogReporter, UpdateOutcome, UpdaterBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let updater = UpdaterBuilder::new()
//!         .project("houseabsolute/cachesweep")
//!         .current_version("v1.0.0")
//!         .asset_name("cachesweep.exe")
//!         .build()?;
//!
//!     if let UpdateOutcome::Staged(_) = updater.run(&LogReporter).await? {
//!         std::process::exit(0);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

mod builder;
mod cleaner;
mod error;
mod launcher;
mod locator;
mod progress;
mod release;
mod updater;

pub use crate::{
    builder::UpdaterBuilder,
    cleaner::{
        clean, relaunch, CacheFolder, CleanReport, FolderOutcome, FolderStatus, Relaunch,
        RelaunchPrompt, RunGuard, RunToken, SweepOutcome, Sweeper,
    },
    error::SweepError,
    launcher::{DetachedLauncher, Launcher},
    locator::{
        parse_executable, HostRegistry, Installation, Locator, RegistrySource, BUNDLE_DIR,
        EXE_NAME, MARKER_DIR, PROTOCOL_HANDLER_KEY,
    },
    progress::{ChannelReporter, LogReporter, Progress, Reporter},
    release::{Asset, Release, ReleaseChecker},
    updater::{StagedUpdate, UpdateOutcome, Updater, SCRATCH_DIR_NAME},
};

// The version of the `cachesweep` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the
/// `cachesweep` binary, but it lives in the library crate so that test code can also enable
/// logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // These are very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .level_for("hyper_util", log::LevelFilter::Error)
        .level_for("reqwest", log::LevelFilter::Error)
        .chain(std::io::stderr())
        .apply()
}
