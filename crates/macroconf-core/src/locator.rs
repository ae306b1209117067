//! Locating configuration files by package, group and location class

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::env::{EnvSource, ProcessEnv};
use crate::error::{Error, Result};
use crate::path::normalize;

/// Environment variable overriding the installation prefix
pub const PREFIX_ENV_VAR: &str = "MACROCONF_PREFIX";

/// Which family of directories a configuration file lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationClass {
    /// The per-user data directory
    #[default]
    User,
    /// `share/` under the installation prefix of the running program
    Prefix,
}

impl FromStr for LocationClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(LocationClass::User),
            "prefix" | "python" => Ok(LocationClass::Prefix),
            other => Err(Error::invalid_option(format!(
                "Unknown location class '{}'",
                other
            ))
            .with_help("The location must be either 'user' or 'prefix'")),
        }
    }
}

impl fmt::Display for LocationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationClass::User => write!(f, "user"),
            LocationClass::Prefix => write!(f, "prefix"),
        }
    }
}

/// Identifies a configuration file in a standard location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub package: String,
    pub group: String,
    pub file: String,
    pub location: LocationClass,
}

impl Locator {
    pub fn new(
        package: impl Into<String>,
        group: impl Into<String>,
        file: impl Into<String>,
        location: LocationClass,
    ) -> Self {
        Self {
            package: package.into(),
            group: group.into(),
            file: file.into(),
            location,
        }
    }

    /// Full path of the located file, using the process environment
    pub fn path(&self) -> Result<PathBuf> {
        self.resolve_path(&ProcessEnv)
    }

    /// Full path of the located file
    ///
    /// `env` is only consulted for the prefix override.
    pub fn resolve_path(&self, env: &dyn EnvSource) -> Result<PathBuf> {
        let base = match self.location {
            LocationClass::User => self.user_data_dir()?,
            LocationClass::Prefix => prefix_dir(env)?
                .join("share")
                .join(&self.group)
                .join(&self.package),
        };
        Ok(normalize(base.join(&self.file)))
    }

    fn user_data_dir(&self) -> Result<PathBuf> {
        #[cfg(windows)]
        let dir = dirs::data_local_dir().map(|d| d.join(&self.group).join(&self.package));
        #[cfg(not(windows))]
        let dir = dirs::data_dir().map(|d| d.join(&self.package));

        dir.ok_or_else(|| {
            Error::io("Could not determine the user data directory")
                .with_help("Use an explicit file path or the 'prefix' location")
        })
    }
}

fn prefix_dir(env: &dyn EnvSource) -> Result<PathBuf> {
    if let Some(prefix) = env.var(PREFIX_ENV_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(prefix));
    }

    let exe = std::env::current_exe()
        .map_err(|e| Error::io(format!("Could not locate the running program: {}", e)))?;
    exe.parent()
        .and_then(|bin| bin.parent())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::io(format!("No installation prefix above {}", exe.display()))
                .with_help(format!("Set {} to the installation prefix", PREFIX_ENV_VAR))
        })
}
