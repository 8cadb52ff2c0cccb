//! Runtime environment description for a bundle.
//!
//! Two requirement universes are tracked side by side: channelled
//! requirements (grouped by the channel they come from, empty string being
//! the default channel) and flat requirements. The set stays internally
//! consistent as the session bootstrap and handlers add dependencies.

pub mod installed;
pub mod requirement;
pub mod version;

mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use installed::{InstalledPackages, InstalledSnapshot};
pub use requirement::{canonical_name, ChannelledRequirement, Requirement, DEFAULT_CHANNEL};
pub use resolver::ModelDependency;
pub use version::{SpecifierSet, Version, VersionError};

#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("Invalid requirement {input:?}: {reason}")]
    InvalidRequirement { input: String, reason: String },

    #[error("Package {name} requested from channels {first:?} and {second:?}")]
    ConflictingChannels {
        name: String,
        first: String,
        second: String,
    },

    #[error("Package {name} specified twice with different constraints: {existing} vs {requested}")]
    DuplicateRequirement {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid lock file line {line}: {reason}")]
    LockFile { line: usize, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Non-fatal dependency conflicts. They never change control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyWarning {
    /// A core dependency was already pinned through the flat system.
    PinnedViaFlat { name: String },
    /// A core dependency already lives in a non-default channel.
    CrossChannel { name: String, channel: String },
    /// The default channel already holds a different explicit constraint.
    ConstraintMismatch {
        name: String,
        kept: String,
        ignored: String,
    },
    /// The same package carries different explicit constraints in the
    /// default channel and in the flat set.
    ChannelledFlatMismatch {
        name: String,
        channelled: String,
        flat: String,
    },
}

impl DependencyWarning {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PinnedViaFlat { .. } => "pinned_via_flat",
            Self::CrossChannel { .. } => "cross_channel",
            Self::ConstraintMismatch { .. } => "constraint_mismatch",
            Self::ChannelledFlatMismatch { .. } => "channelled_flat_mismatch",
        }
    }

    pub(crate) fn emit(&self) {
        tracing::warn!(kind = self.kind(), "{}", self);
        crate::telemetry::record_dependency_warning(self.kind());
    }
}

impl fmt::Display for DependencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinnedViaFlat { name } => write!(
                f,
                "basic dependency {} specified through flat requirements; this may break environment resolution at deployment",
                name
            ),
            Self::CrossChannel { name, channel } => write!(
                f,
                "basic dependency {} specified from non-default channel {:?}; this may break environment resolution at deployment",
                name, channel
            ),
            Self::ConstraintMismatch {
                name,
                kept,
                ignored,
            } => write!(
                f,
                "dependency {} keeps user constraint {} over {}",
                name, kept, ignored
            ),
            Self::ChannelledFlatMismatch {
                name,
                channelled,
                flat,
            } => write!(
                f,
                "dependency {} has channelled constraint {} but flat constraint {}",
                name, channelled, flat
            ),
        }
    }
}

/// Channelled and flat requirements of one bundle.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    channelled: BTreeMap<String, Vec<Requirement>>,
    flat: Vec<Requirement>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from user-supplied requirement strings.
    ///
    /// Fails on malformed input, on the same package in two channels and on
    /// conflicting duplicates; identical repeats collapse into one entry.
    pub fn from_user<C, F>(
        channelled: &[C],
        flat: &[F],
    ) -> Result<(Self, Vec<DependencyWarning>), DependencyError>
    where
        C: AsRef<str>,
        F: AsRef<str>,
    {
        let mut set = Self::new();
        for raw in channelled {
            let parsed: ChannelledRequirement = raw.as_ref().parse()?;
            set.append_channelled(&parsed.channel, parsed.requirement)?;
        }
        for raw in flat {
            let parsed: Requirement = raw.as_ref().parse()?;
            set.append_flat(parsed)?;
        }

        let mut warnings = Vec::new();
        for req in set.channel(DEFAULT_CHANNEL) {
            if let Some(flat) = set.find_flat(req.name()) {
                if req.has_constraint() && flat.has_constraint() && !req.same_constraint(flat) {
                    let warning = DependencyWarning::ChannelledFlatMismatch {
                        name: req.canonical_name(),
                        channelled: req.to_string(),
                        flat: flat.to_string(),
                    };
                    warning.emit();
                    warnings.push(warning);
                }
            }
        }
        Ok((set, warnings))
    }

    /// Rebuild a set from already validated parts (used when loading).
    pub(crate) fn from_parts(
        channelled: BTreeMap<String, Vec<Requirement>>,
        flat: Vec<Requirement>,
    ) -> Self {
        let channelled = channelled
            .into_iter()
            .filter(|(_, reqs)| !reqs.is_empty())
            .collect();
        Self { channelled, flat }
    }

    /// Requirements of one channel, in insertion order.
    pub fn channel(&self, channel: &str) -> &[Requirement] {
        self.channelled
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &[Requirement])> {
        self.channelled
            .iter()
            .map(|(chan, reqs)| (chan.as_str(), reqs.as_slice()))
    }

    pub fn flat(&self) -> &[Requirement] {
        &self.flat
    }

    /// Locate a channelled requirement by package name, in any channel.
    pub fn find_channelled(&self, name: &str) -> Option<(&str, &Requirement)> {
        let wanted = canonical_name(name);
        self.channelled.iter().find_map(|(chan, reqs)| {
            reqs.iter()
                .find(|r| r.canonical_name() == wanted)
                .map(|r| (chan.as_str(), r))
        })
    }

    pub fn find_flat(&self, name: &str) -> Option<&Requirement> {
        let wanted = canonical_name(name);
        self.flat.iter().find(|r| r.canonical_name() == wanted)
    }

    /// Add a channelled requirement, enforcing per-channel uniqueness and
    /// the single-channel rule.
    pub fn append_channelled(
        &mut self,
        channel: &str,
        requirement: Requirement,
    ) -> Result<(), DependencyError> {
        if let Some((existing_channel, existing)) = self.find_channelled(requirement.name()) {
            if existing_channel != channel {
                return Err(DependencyError::ConflictingChannels {
                    name: requirement.canonical_name(),
                    first: existing_channel.to_string(),
                    second: channel.to_string(),
                });
            }
            if existing.same_constraint(&requirement) {
                return Ok(());
            }
            return Err(DependencyError::DuplicateRequirement {
                name: requirement.canonical_name(),
                existing: existing.to_string(),
                requested: requirement.to_string(),
            });
        }
        self.channelled
            .entry(channel.to_string())
            .or_default()
            .push(requirement);
        Ok(())
    }

    /// Add a flat requirement; identical repeats are a no-op.
    pub fn append_flat(&mut self, requirement: Requirement) -> Result<(), DependencyError> {
        if let Some(existing) = self.find_flat(requirement.name()) {
            if existing.same_constraint(&requirement) {
                return Ok(());
            }
            return Err(DependencyError::DuplicateRequirement {
                name: requirement.canonical_name(),
                existing: existing.to_string(),
                requested: requirement.to_string(),
            });
        }
        self.flat.push(requirement);
        Ok(())
    }

    /// Sorted `channel::requirement` strings (no prefix for the default channel).
    pub fn channelled_dependencies(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .channelled
            .iter()
            .flat_map(|(chan, reqs)| {
                reqs.iter().map(move |req| {
                    ChannelledRequirement {
                        channel: chan.clone(),
                        requirement: req.clone(),
                    }
                    .to_string()
                })
            })
            .collect();
        out.sort();
        out
    }

    /// Sorted flat requirement strings.
    pub fn flat_requirements(&self) -> Vec<String> {
        let mut out: Vec<String> = self.flat.iter().map(Requirement::to_string).collect();
        out.sort();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.channelled.is_empty() && self.flat.is_empty()
    }
}

impl PartialEq for DependencySet {
    fn eq(&self, other: &Self) -> bool {
        self.channelled_dependencies() == other.channelled_dependencies()
            && self.flat_requirements() == other.flat_requirements()
    }
}

impl Eq for DependencySet {}
