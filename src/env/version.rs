//! Version parsing, ordering and specifier matching.
//!
//! Versions follow the release-segment grammar used by the flat requirement
//! ecosystem: `N(.N)*` with optional pre-release (`a`, `b`, `rc`), `.post`,
//! `.dev` and `+local` parts. Malformed input is rejected, never truncated.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version: {0:?}")]
    Invalid(String),

    #[error("Invalid version specifier: {0:?}")]
    InvalidSpecifier(String),
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^v?(?P<release>\d+(?:\.\d+)*)(?:[-_.]?(?P<pre_l>alpha|beta|rc|a|b|c)[-_.]?(?P<pre_n>\d+)?)?(?P<post_m>[-_.]?post[-_.]?(?P<post>\d+)?)?(?P<dev_m>[-_.]?dev[-_.]?(?P<dev>\d+)?)?(?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?$",
        )
        .expect("version pattern is valid")
    })
}

fn specifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(===|~=|==|!=|<=|>=|<|>)\s*(\S+)$").expect("specifier pattern is valid")
    })
}

/// Pre-release phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Beta,
    Candidate,
}

impl PreRelease {
    fn tag(self) -> &'static str {
        match self {
            PreRelease::Alpha => "a",
            PreRelease::Beta => "b",
            PreRelease::Candidate => "rc",
        }
    }
}

/// A parsed, normalized version.
#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

impl Version {
    /// Plain release version such as `3.10`.
    pub fn from_release(segments: &[u64]) -> Self {
        Version {
            release: segments.to_vec(),
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    /// Release segments, e.g. `[3, 10, 4]`.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// Same version with the local label removed.
    fn public(&self) -> Version {
        Version {
            local: None,
            ..self.clone()
        }
    }

    fn release_segment(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    fn starts_with_release(&self, prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, seg)| self.release_segment(i) == *seg)
    }

    // dev-only releases sort before any pre-release of the same release.
    fn phase_key(&self) -> (u8, u8, u64) {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (0, 0, 0),
            (Some((kind, n)), _, _) => (1, kind as u8, n),
            _ => (2, 0, 0),
        }
    }
}

fn parse_number(text: &str, original: &str) -> Result<u64, VersionError> {
    text.parse::<u64>()
        .map_err(|_| VersionError::Invalid(original.to_string()))
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = version_pattern()
            .captures(trimmed)
            .ok_or_else(|| VersionError::Invalid(s.to_string()))?;

        let release = caps["release"]
            .split('.')
            .map(|seg| parse_number(seg, s))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let kind = match label.as_str().to_ascii_lowercase().as_str() {
                    "a" | "alpha" => PreRelease::Alpha,
                    "b" | "beta" => PreRelease::Beta,
                    _ => PreRelease::Candidate,
                };
                let n = match caps.name("pre_n") {
                    Some(n) => parse_number(n.as_str(), s)?,
                    None => 0,
                };
                Some((kind, n))
            }
            None => None,
        };

        // `.post` and `.dev` may appear without a number.
        let post = if caps.name("post_m").is_some() {
            Some(match caps.name("post") {
                Some(n) => parse_number(n.as_str(), s)?,
                None => 0,
            })
        } else {
            None
        };
        let dev = if caps.name("dev_m").is_some() {
            Some(match caps.name("dev") {
                Some(n) => parse_number(n.as_str(), s)?,
                None => 0,
            })
        } else {
            None
        };

        let local = caps
            .name("local")
            .map(|l| l.as_str().to_ascii_lowercase().replace(['-', '_'], "."));

        Ok(Version {
            release,
            pre,
            post,
            dev,
            local,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{}", kind.tag(), n)?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{}", post)?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{}", dev)?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for idx in 0..len {
            match self.release_segment(idx).cmp(&other.release_segment(idx)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.phase_key()
            .cmp(&other.phase_key())
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| match (self.dev, other.dev) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(&b),
            })
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Comparison operator of a single version clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Arbitrary,
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Arbitrary => "===",
            Operator::Compatible => "~=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "===" => Operator::Arbitrary,
            "~=" => Operator::Compatible,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "<" => Operator::Less,
            ">" => Operator::Greater,
            _ => return None,
        })
    }
}

/// One `<op><version>` clause such as `>=1.2` or `==2.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    op: Operator,
    text: String,
    version: Option<Version>,
    wildcard: bool,
}

impl Specifier {
    pub fn exact(version: &Version) -> Self {
        Self {
            op: Operator::Equal,
            text: version.to_string(),
            version: Some(version.clone()),
            wildcard: false,
        }
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        let Some(target) = &self.version else {
            // `===` compares text only.
            return candidate.to_string() == self.text;
        };
        match self.op {
            Operator::Arbitrary => candidate.to_string() == self.text,
            Operator::Equal => self.matches_equal(candidate, target),
            Operator::NotEqual => !self.matches_equal(candidate, target),
            Operator::LessEqual => candidate.public() <= *target,
            Operator::GreaterEqual => candidate.public() >= *target,
            Operator::Less => candidate.public() < *target,
            Operator::Greater => candidate.public() > *target,
            Operator::Compatible => {
                let prefix = &target.release()[..target.release().len() - 1];
                candidate.public() >= *target && candidate.starts_with_release(prefix)
            }
        }
    }

    fn matches_equal(&self, candidate: &Version, target: &Version) -> bool {
        if self.wildcard {
            candidate.starts_with_release(target.release())
        } else if target.local.is_some() {
            candidate == target
        } else {
            candidate.public() == *target
        }
    }
}

impl FromStr for Specifier {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidSpecifier(s.to_string());
        let caps = specifier_pattern().captures(s.trim()).ok_or_else(invalid)?;
        let op = Operator::from_symbol(&caps[1]).ok_or_else(invalid)?;
        let text = caps[2].to_string();

        if op == Operator::Arbitrary {
            return Ok(Self {
                op,
                text,
                version: None,
                wildcard: false,
            });
        }

        let (raw, wildcard) = match text.strip_suffix(".*") {
            Some(raw) => (raw, true),
            None => (text.as_str(), false),
        };
        if wildcard && !matches!(op, Operator::Equal | Operator::NotEqual) {
            return Err(invalid());
        }
        let version: Version = raw.parse().map_err(|_| invalid())?;
        if op == Operator::Compatible && version.release().len() < 2 {
            return Err(invalid());
        }

        Ok(Self {
            op,
            text: if wildcard {
                format!("{}.*", version)
            } else {
                version.to_string()
            },
            version: Some(version),
            wildcard,
        })
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.text)
    }
}

/// Comma-separated conjunction of specifiers. Empty means "any version".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierSet(Vec<Specifier>);

impl SpecifierSet {
    pub fn any() -> Self {
        Self(Vec::new())
    }

    pub fn pinned(version: &Version) -> Self {
        Self(vec![Specifier::exact(version)])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specifier> {
        self.0.iter()
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.0.iter().all(|spec| spec.contains(version))
    }

    /// Same clauses regardless of order.
    pub fn same_constraint(&self, other: &SpecifierSet) -> bool {
        let mut left: Vec<String> = self.0.iter().map(Specifier::to_string).collect();
        let mut right: Vec<String> = other.0.iter().map(Specifier::to_string).collect();
        left.sort();
        right.sort();
        left == right
    }
}

impl FromStr for SpecifierSet {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::any());
        }
        s.split(',')
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Specifier::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_normalize() {
        assert_eq!(v("2.7").to_string(), "2.7");
        assert_eq!(v("v1.0.0").to_string(), "1.0.0");
        assert_eq!(v("1.0-alpha2").to_string(), "1.0a2");
        assert_eq!(v("1.0.post1.dev3").to_string(), "1.0.post1.dev3");
        assert_eq!(v("1.2+Local_Build").to_string(), "1.2+local.build");
    }

    #[test]
    fn test_malformed_versions_rejected() {
        for bad in ["a", "", "1..2", "1.2.x", "3.10 beta two"] {
            assert!(
                matches!(bad.parse::<Version>(), Err(VersionError::Invalid(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.0.dev1") < v("1.0a1"));
        assert!(v("1.0a1") < v("1.0b1"));
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0") < v("1.0.post1"));
        assert!(v("1.9") < v("1.10"));
        assert_eq!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn test_specifier_matching() {
        let set: SpecifierSet = ">=1.2,<2".parse().unwrap();
        assert!(set.contains(&v("1.2")));
        assert!(set.contains(&v("1.9.3")));
        assert!(!set.contains(&v("2.0")));

        let compat: SpecifierSet = "~=1.4.2".parse().unwrap();
        assert!(compat.contains(&v("1.4.9")));
        assert!(!compat.contains(&v("1.5.0")));

        let wild: SpecifierSet = "==2.1.*".parse().unwrap();
        assert!(wild.contains(&v("2.1.7")));
        assert!(!wild.contains(&v("2.2")));

        assert!(SpecifierSet::any().contains(&v("0.0.1")));
    }

    #[test]
    fn test_invalid_specifiers() {
        assert!("~=1".parse::<SpecifierSet>().is_err());
        assert!(">=1.*".parse::<SpecifierSet>().is_err());
        assert!("=>1.0".parse::<SpecifierSet>().is_err());
    }

    #[test]
    fn test_same_constraint_ignores_order() {
        let a: SpecifierSet = ">=1,<2".parse().unwrap();
        let b: SpecifierSet = "<2, >=1".parse().unwrap();
        assert!(a.same_constraint(&b));
        assert!(!a.same_constraint(&SpecifierSet::any()));
    }
}
