//! Lookup of locally installed package versions.
//!
//! The resolver pins bootstrap and handler dependencies to the versions that
//! are actually present where the bundle is authored. The hosting package
//! environment is an external collaborator; it is reached through the
//! [`InstalledPackages`] trait.

use std::collections::BTreeMap;
use std::path::Path;

use super::requirement::{canonical_name, Requirement};
use super::version::Version;
use super::DependencyError;

/// Source of "which version of this package is installed here".
pub trait InstalledPackages: Send + Sync {
    /// Installed version of `name`, if the package is present.
    fn installed_version(&self, name: &str) -> Option<Version>;

    /// Pin `requirement` to the installed version when that version
    /// satisfies the requirement's own constraint. Otherwise the
    /// requirement is returned unchanged.
    fn pin_to_installed(&self, requirement: &Requirement) -> Requirement {
        match self.installed_version(requirement.name()) {
            Some(version) if requirement.specifier().contains(&version) => {
                Requirement::pinned(requirement.name(), &version)
            }
            Some(version) => {
                tracing::debug!(
                    package = requirement.name(),
                    installed = %version,
                    constraint = %requirement.specifier(),
                    "installed version does not satisfy constraint, keeping constraint"
                );
                requirement.clone()
            }
            None => {
                tracing::debug!(
                    package = requirement.name(),
                    "package not installed, requirement left unpinned"
                );
                requirement.clone()
            }
        }
    }
}

/// In-memory snapshot of an installed package set.
#[derive(Debug, Clone, Default)]
pub struct InstalledSnapshot {
    packages: BTreeMap<String, Version>,
}

impl InstalledSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, version: &str) -> Result<Self, DependencyError> {
        self.insert(name, version)?;
        Ok(self)
    }

    pub fn insert(&mut self, name: &str, version: &str) -> Result<(), DependencyError> {
        let parsed = version
            .parse::<Version>()
            .map_err(|e| DependencyError::InvalidRequirement {
                input: format!("{}=={}", name, version),
                reason: e.to_string(),
            })?;
        self.packages.insert(canonical_name(name), parsed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Parse a lock file: one `name==version` per line, `#` comments allowed.
    pub fn from_lock_str(content: &str) -> Result<Self, DependencyError> {
        let mut snapshot = Self::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (name, version) = line.split_once("==").ok_or_else(|| DependencyError::LockFile {
                line: idx + 1,
                reason: format!("expected name==version, got {:?}", line),
            })?;
            snapshot
                .insert(name.trim(), version.trim())
                .map_err(|e| DependencyError::LockFile {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
        }
        Ok(snapshot)
    }

    pub fn from_lock_file(path: &Path) -> Result<Self, DependencyError> {
        let content = std::fs::read_to_string(path).map_err(|source| DependencyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_lock_str(&content)
    }
}

impl InstalledPackages for InstalledSnapshot {
    fn installed_version(&self, name: &str) -> Option<Version> {
        self.packages.get(&canonical_name(name)).cloned()
    }
}
