//! Requirement strings for the channelled and flat dependency systems.
//!
//! Flat form: `name[extra,...]<specifiers>`, e.g. `torch>=2.0,<3`.
//! Channelled form: an optional `channel::` prefix on the same grammar,
//! e.g. `conda-forge::pandas==2.1.4`. No prefix means the default channel.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::version::{SpecifierSet, Version};
use super::DependencyError;

/// Name of the implicit default channel.
pub const DEFAULT_CHANNEL: &str = "";

fn requirement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<spec>[<>=!~].*)?$",
        )
        .expect("requirement pattern is valid")
    })
}

fn channel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("channel pattern is valid")
    })
}

/// Canonical package name: lowercase, runs of `-`, `_` and `.` folded to `-`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// A validated package requirement: name plus optional version constraint.
#[derive(Debug, Clone)]
pub struct Requirement {
    name: String,
    extras: Vec<String>,
    specifier: SpecifierSet,
}

impl Requirement {
    pub fn new(name: impl Into<String>, specifier: SpecifierSet) -> Self {
        Self {
            name: name.into(),
            extras: Vec::new(),
            specifier,
        }
    }

    /// `name==version`.
    pub fn pinned(name: impl Into<String>, version: &Version) -> Self {
        Self::new(name, SpecifierSet::pinned(version))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical_name(&self) -> String {
        canonical_name(&self.name)
    }

    pub fn specifier(&self) -> &SpecifierSet {
        &self.specifier
    }

    pub fn has_constraint(&self) -> bool {
        !self.specifier.is_empty()
    }

    pub fn same_package(&self, other: &Requirement) -> bool {
        self.canonical_name() == other.canonical_name()
    }

    /// Same package with an equivalent constraint.
    pub fn same_constraint(&self, other: &Requirement) -> bool {
        self.same_package(other)
            && self.extras == other.extras
            && self.specifier.same_constraint(&other.specifier)
    }

    /// Copy of this requirement under a different package name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.same_constraint(other)
    }
}

impl Eq for Requirement {}

impl FromStr for Requirement {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| DependencyError::InvalidRequirement {
            input: s.to_string(),
            reason,
        };

        let caps = requirement_pattern()
            .captures(s.trim())
            .ok_or_else(|| invalid("not a requirement".into()))?;

        let extras = match caps.name("extras") {
            Some(list) => {
                let mut extras: Vec<String> = list
                    .as_str()
                    .split(',')
                    .map(|e| canonical_name(e.trim()))
                    .filter(|e| !e.is_empty())
                    .collect();
                extras.sort();
                extras.dedup();
                extras
            }
            None => Vec::new(),
        };

        let specifier = match caps.name("spec") {
            Some(spec) => spec
                .as_str()
                .parse::<SpecifierSet>()
                .map_err(|e| invalid(e.to_string()))?,
            None => SpecifierSet::any(),
        };

        Ok(Self {
            name: caps["name"].to_string(),
            extras,
            specifier,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.specifier)
    }
}

/// A requirement qualified by the channel it should be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelledRequirement {
    pub channel: String,
    pub requirement: Requirement,
}

impl ChannelledRequirement {
    pub fn is_default_channel(&self) -> bool {
        self.channel == DEFAULT_CHANNEL
    }
}

impl FromStr for ChannelledRequirement {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, rest) = match s.split_once("::") {
            Some((channel, rest)) => {
                let channel = channel.trim();
                if !channel_pattern().is_match(channel) {
                    return Err(DependencyError::InvalidRequirement {
                        input: s.to_string(),
                        reason: format!("invalid channel name {:?}", channel),
                    });
                }
                (channel.to_string(), rest)
            }
            None => (DEFAULT_CHANNEL.to_string(), s),
        };

        let requirement = rest.parse::<Requirement>().map_err(|e| match e {
            DependencyError::InvalidRequirement { reason, .. } => {
                DependencyError::InvalidRequirement {
                    input: s.to_string(),
                    reason,
                }
            }
            other => other,
        })?;

        Ok(Self {
            channel,
            requirement,
        })
    }
}

impl fmt::Display for ChannelledRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_channel() {
            write!(f, "{}", self.requirement)
        } else {
            write!(f, "{}::{}", self.channel, self.requirement)
        }
    }
}
