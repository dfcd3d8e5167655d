use crate::error::{Result, SweepError};
use log::debug;
use std::{
    ffi::OsString,
    fmt::Debug,
    path::Path,
    process::{Command, Stdio},
};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

// See https://learn.microsoft.com/en-us/windows/win32/procthread/process-creation-flags
#[cfg(target_os = "windows")]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// A `Launcher` starts a program that should outlive the current process. It never waits for the
/// program it starts.
pub trait Launcher: Debug + Send + Sync {
    /// Start `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Filesystem`] if the program cannot be started.
    fn launch(&self, program: &Path, args: &[OsString]) -> Result<()>;
}

/// The `Launcher` used outside of tests. The child gets no stdio handles from us and, on Windows,
/// is detached from our console so that it keeps running once we exit.
#[derive(Debug, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, program: &Path, args: &[OsString]) -> Result<()> {
        debug!("launching {} with args {args:?}", program.display());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(target_os = "windows")]
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);

        // Dropping the `Child` does not wait for or kill the process.
        cmd.spawn().map(drop).map_err(|e| {
            SweepError::filesystem(format!("failed to start {}", program.display()), e)
        })
    }
}
