//! System package-manager shim.
//!
//! The fast path for `install`: when the host package manager already ships
//! the requested name, pygr records a `system:` entry and delegates instead
//! of building from source. Only the small contract the core consumes is
//! implemented: detect, query availability, install.

use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SystemPmError {
    #[error("no supported system package manager found")]
    NoManager,

    #[error("{pm} failed installing {package}: {detail}")]
    InstallFailed {
        pm: String,
        package: String,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported host package managers, probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPm {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    Apk,
}

impl SystemPm {
    pub fn name(self) -> &'static str {
        match self {
            SystemPm::Apt => "apt",
            SystemPm::Dnf => "dnf",
            SystemPm::Pacman => "pacman",
            SystemPm::Zypper => "zypper",
            SystemPm::Apk => "apk",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "apt" => Some(SystemPm::Apt),
            "dnf" => Some(SystemPm::Dnf),
            "pacman" => Some(SystemPm::Pacman),
            "zypper" => Some(SystemPm::Zypper),
            "apk" => Some(SystemPm::Apk),
            _ => None,
        }
    }

    /// First package manager present on this host.
    pub fn detect() -> Option<Self> {
        [
            SystemPm::Apt,
            SystemPm::Dnf,
            SystemPm::Pacman,
            SystemPm::Zypper,
            SystemPm::Apk,
        ]
        .into_iter()
        .find(|pm| which::which(pm.name()).is_ok())
    }

    /// Does the manager know this package name?
    pub fn has_package(self, package: &str) -> bool {
        let (cmd, args): (&str, Vec<&str>) = match self {
            SystemPm::Apt => ("apt-cache", vec!["show", package]),
            SystemPm::Dnf => ("dnf", vec!["info", package]),
            SystemPm::Pacman => ("pacman", vec!["-Si", package]),
            SystemPm::Zypper => ("zypper", vec!["info", package]),
            SystemPm::Apk => ("apk", vec!["info", "-e", package]),
        };

        Command::new(cmd)
            .args(args)
            .output()
            .map(|out| out.status.success() && !out.stdout.is_empty())
            .unwrap_or(false)
    }

    pub fn install(self, package: &str) -> Result<(), SystemPmError> {
        let (cmd, args): (&str, Vec<&str>) = match self {
            SystemPm::Apt => ("apt", vec!["install", "-y", package]),
            SystemPm::Dnf => ("dnf", vec!["install", "-y", package]),
            SystemPm::Pacman => ("pacman", vec!["-S", "--noconfirm", package]),
            SystemPm::Zypper => ("zypper", vec!["install", "-y", package]),
            SystemPm::Apk => ("apk", vec!["add", package]),
        };

        let output = Command::new(cmd).args(args).output()?;
        if !output.status.success() {
            return Err(SystemPmError::InstallFailed {
                pm: self.name().to_string(),
                package: package.to_string(),
                detail: String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .last()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for pm in [
            SystemPm::Apt,
            SystemPm::Dnf,
            SystemPm::Pacman,
            SystemPm::Zypper,
            SystemPm::Apk,
        ] {
            assert_eq!(SystemPm::from_name(pm.name()), Some(pm));
        }
        assert_eq!(SystemPm::from_name("brew"), None);
    }
}
