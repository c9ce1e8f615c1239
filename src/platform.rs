//! Host platform detection and `$PATH` lookups.
//!
//! Everything here is a pure function of the process environment captured at
//! startup, so resolution stays deterministic for the whole execution.

use crate::error::{PmpError, Result};
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Default `%PATHEXT%` used when the variable is unset on Windows.
const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// A snapshot of the pieces of the host environment that binary resolution
/// depends on.
#[derive(Clone, Debug)]
pub struct Platform {
    os: String,
    arch: String,
    path: OsString,
    pathext: Option<String>,
}

impl Platform {
    /// Captures the current process environment.
    pub fn capture() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            path: env::var_os("PATH").unwrap_or_default(),
            pathext: env::var("PATHEXT").ok(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_env(
        os: &str,
        arch: &str,
        path: impl Into<OsString>,
        pathext: Option<&str>,
    ) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            path: path.into(),
            pathext: pathext.map(str::to_string),
        }
    }

    /// Returns the canonical repository classifier for native binaries on
    /// this host, e.g. `linux-x86_64` or `osx-aarch_64`.
    ///
    /// Upstream publishes `amd64` builds under `x86_64`, `zarch_64` under
    /// `s390_64` and `ppc64` under `ppcle_64`; those aliases are folded here.
    pub fn classifier(&self, artifact: &str) -> Result<String> {
        let os = match self.os.as_str() {
            "linux" => "linux",
            "macos" => "osx",
            "windows" => "windows",
            _ => return Err(self.unsupported()),
        };
        let arch = match (os, self.arch.as_str()) {
            (_, "x86_64" | "amd64") => "x86_64",
            ("windows", "x86") => "x86_32",
            ("linux" | "osx", "aarch64") => "aarch_64",
            ("linux", "powerpc64" | "ppc64") => "ppcle_64",
            ("linux", "s390x" | "zarch_64") => "s390_64",
            _ => return Err(self.unsupported()),
        };
        let classifier = format!("{os}-{arch}");
        trace!(artifact, %classifier, "inferred platform classifier");
        Ok(classifier)
    }

    fn unsupported(&self) -> PmpError {
        PmpError::UnsupportedPlatform { os: self.os.clone(), arch: self.arch.clone() }
    }

    /// Whether this host resolves executables Windows-style.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Searches the captured `$PATH` for an executable called `name`.
    ///
    /// On POSIX the match is case-sensitive and the file must be regular and
    /// owner-executable. On Windows the name is matched case-insensitively
    /// against every extension in `%PATHEXT%`, appending the extension when
    /// the name does not already carry it. Directories are scanned in path
    /// order and the first hit wins.
    pub fn search_path(&self, name: &str) -> Option<PathBuf> {
        for dir in env::split_paths(&self.path) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            if self.is_windows() {
                if let Some(hit) = self.search_windows_dir(&dir, name) {
                    return Some(hit);
                }
            } else {
                let candidate = dir.join(name);
                if is_posix_executable(&candidate) {
                    debug!(name, path = %candidate.display(), "found executable on PATH");
                    return Some(candidate);
                }
            }
        }
        debug!(name, "no executable found on PATH");
        None
    }

    fn search_windows_dir(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let lower = name.to_lowercase();
        for ext in self.pathext.as_deref().unwrap_or(DEFAULT_PATHEXT).split(';') {
            if ext.is_empty() {
                continue;
            }
            let candidate = if lower.ends_with(&ext.to_lowercase()) {
                dir.join(name)
            } else {
                dir.join(format!("{name}{ext}"))
            };
            // the filesystem itself folds case on Windows
            if candidate.is_file() {
                debug!(name, path = %candidate.display(), "found executable on PATH");
                return Some(candidate);
            }
        }
        None
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn is_posix_executable(path: &Path) -> bool {
            use std::os::unix::fs::PermissionsExt;
            path.metadata()
                .map(|meta| meta.is_file() && meta.permissions().mode() & 0o100 != 0)
                .unwrap_or(false)
        }
    } else {
        fn is_posix_executable(path: &Path) -> bool {
            path.is_file()
        }
    }
}

/// Adds the owner-execute bit where POSIX permissions exist; no-op elsewhere.
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = path.metadata().map_err(|err| PmpError::io(err, path))?;
        let mut permissions = meta.permissions();
        let mode = permissions.mode();
        if mode & 0o100 == 0 {
            permissions.set_mode(mode | 0o100);
            std::fs::set_permissions(path, permissions)
                .map_err(|err| PmpError::io(err, path))?;
        }
    }
    let _ = path;
    Ok(())
}
