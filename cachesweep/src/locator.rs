use crate::error::{Result, SweepError};
use log::debug;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

/// The key under `HKEY_CLASSES_ROOT` that holds the command Windows runs for `fivem://` links.
pub const PROTOCOL_HANDLER_KEY: &str = r"FiveM.ProtocolHandler\shell\open\command";
/// The file name of the FiveM launcher.
pub const EXE_NAME: &str = "FiveM.exe";
/// The directory next to the launcher that contains the actual application.
pub const BUNDLE_DIR: &str = "FiveM.app";
/// A directory that exists in every real FiveM application directory.
pub const MARKER_DIR: &str = "data";

/// A `RegistrySource` reads string values out of the host's registry.
pub trait RegistrySource: Debug + Send + Sync {
    /// Returns the default (unnamed) value of `key` under `HKEY_CLASSES_ROOT`.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Registry`] if the key cannot be opened or the value cannot be read as a
    /// string.
    fn read_default_value(&self, key: &str) -> Result<String>;
}

/// Reads from the real Windows registry. On every other OS, every read fails.
#[derive(Debug, Default)]
pub struct HostRegistry;

#[cfg(target_os = "windows")]
impl RegistrySource for HostRegistry {
    fn read_default_value(&self, key: &str) -> Result<String> {
        use winreg::{
            enums::{HKEY_CLASSES_ROOT, KEY_QUERY_VALUE},
            RegKey,
        };

        let registry_error = |source| SweepError::Registry {
            key: key.to_string(),
            source,
        };
        RegKey::predef(HKEY_CLASSES_ROOT)
            .open_subkey_with_flags(key, KEY_QUERY_VALUE)
            .map_err(registry_error)?
            .get_value::<String, _>("")
            .map_err(registry_error)
    }
}

#[cfg(not(target_os = "windows"))]
impl RegistrySource for HostRegistry {
    fn read_default_value(&self, key: &str) -> Result<String> {
        Err(SweepError::Registry {
            key: key.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "the registry only exists on Windows",
            ),
        })
    }
}

/// A FiveM install that has passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Installation {
    bundle_dir: PathBuf,
    executable: PathBuf,
}

impl Installation {
    /// The application directory, e.g. `C:\Users\me\AppData\Local\FiveM\FiveM.app`.
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// The launcher executable, which is what gets started again after a sweep.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The directory that the cache folders live in.
    pub fn data_dir(&self) -> PathBuf {
        self.bundle_dir.join(MARKER_DIR)
    }
}

/// `Locator` finds the FiveM install by looking at the registered `fivem://` protocol handler.
#[derive(Debug)]
pub struct Locator<R> {
    registry: R,
    key: String,
    exe_name: String,
    bundle_dir_name: String,
}

impl<R: RegistrySource> Locator<R> {
    /// A locator for FiveM that reads from `registry`.
    pub fn new(registry: R) -> Self {
        Self::for_app(registry, PROTOCOL_HANDLER_KEY, EXE_NAME, BUNDLE_DIR)
    }

    /// A locator for an application laid out like FiveM but with different names.
    pub fn for_app(registry: R, key: &str, exe_name: &str, bundle_dir_name: &str) -> Self {
        Self {
            registry,
            key: key.to_string(),
            exe_name: exe_name.to_string(),
            bundle_dir_name: bundle_dir_name.to_string(),
        }
    }

    /// Look up the protocol handler's command line and turn it into a validated [`Installation`].
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Registry`] if the registry can't be read, and
    /// [`SweepError::NotFound`] if the directory it points to is not a FiveM install.
    pub fn detect(&self) -> Result<Installation> {
        let command = self.registry.read_default_value(&self.key)?;
        debug!("protocol handler command is `{command}`");

        let executable = parse_executable(&command);
        let install_root = executable
            .strip_suffix(self.exe_name.as_str())
            .unwrap_or(executable);
        let bundle_dir = Path::new(install_root).join(&self.bundle_dir_name);
        debug!("candidate application directory is {}", bundle_dir.display());

        if !is_installation(&bundle_dir) {
            return Err(SweepError::NotFound { path: bundle_dir });
        }

        Ok(Installation {
            bundle_dir,
            executable: PathBuf::from(executable),
        })
    }
}

/// Pulls the executable path out of a command line like `"C:\FiveM\FiveM.exe" "%1"`. Everything
/// from the first quote-space onwards is treated as arguments.
pub fn parse_executable(command: &str) -> &str {
    command
        .split("\" ")
        .next()
        .unwrap_or_default()
        .trim_matches('"')
}

fn is_installation(bundle_dir: &Path) -> bool {
    !bundle_dir.as_os_str().is_empty() && bundle_dir.join(MARKER_DIR).is_dir()
}
