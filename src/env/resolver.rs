//! Incremental merge of bootstrap and handler dependencies.
//!
//! User-specified requirements always win over dependencies added here:
//! an existing entry for the same package is never replaced or removed.

use super::installed::InstalledPackages;
use super::requirement::{ChannelledRequirement, Requirement, DEFAULT_CHANNEL};
use super::{DependencyError, DependencySet, DependencyWarning};

/// A dependency named in both universes: the channelled requirement and the
/// package name it goes by in the flat system (e.g. `pytorch` / `torch`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDependency {
    pub requirement: String,
    pub flat_name: String,
}

impl ModelDependency {
    pub fn new(requirement: impl Into<String>, flat_name: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            flat_name: flat_name.into(),
        }
    }

    /// Same name in both universes.
    pub fn same(name: &str) -> Self {
        Self::new(name, name)
    }
}

impl DependencySet {
    /// Add `candidates` to the default channel unless the package is already
    /// accounted for.
    ///
    /// Every candidate is parsed before anything is mutated, so a malformed
    /// entry leaves the set untouched. Candidates are pinned to the locally
    /// installed version of their flat-side package. Conflicts with existing
    /// entries are reported as warnings and the existing entry is kept.
    pub fn include_if_absent(
        &mut self,
        candidates: &[ModelDependency],
        installed: &dyn InstalledPackages,
    ) -> Result<Vec<DependencyWarning>, DependencyError> {
        let parsed = candidates
            .iter()
            .map(parse_candidate)
            .collect::<Result<Vec<_>, _>>()?;

        let mut warnings = Vec::new();
        for (channelled, flat) in parsed {
            if self.find_flat(flat.name()).is_some() {
                let warning = DependencyWarning::PinnedViaFlat {
                    name: channelled.canonical_name(),
                };
                warning.emit();
                warnings.push(warning);
                continue;
            }

            let probe = if flat.has_constraint() {
                flat
            } else {
                Requirement::new(flat.name(), channelled.specifier().clone())
            };
            let stamped = installed.pin_to_installed(&probe).renamed(channelled.name());

            match self.find_channelled(stamped.name()) {
                Some((chan, existing)) if chan == DEFAULT_CHANNEL => {
                    if existing.same_constraint(&stamped) {
                        continue;
                    }
                    if existing.has_constraint() && stamped.has_constraint() {
                        let warning = DependencyWarning::ConstraintMismatch {
                            name: stamped.canonical_name(),
                            kept: existing.to_string(),
                            ignored: stamped.to_string(),
                        };
                        warning.emit();
                        warnings.push(warning);
                    } else {
                        tracing::debug!(
                            package = stamped.name(),
                            kept = %existing,
                            "user requirement takes precedence over default dependency"
                        );
                    }
                }
                Some((chan, _)) => {
                    let warning = DependencyWarning::CrossChannel {
                        name: stamped.canonical_name(),
                        channel: chan.to_string(),
                    };
                    warning.emit();
                    warnings.push(warning);
                }
                None => {
                    self.append_channelled(DEFAULT_CHANNEL, stamped)?;
                }
            }
        }
        Ok(warnings)
    }
}

fn parse_candidate(dep: &ModelDependency) -> Result<(Requirement, Requirement), DependencyError> {
    let channelled: ChannelledRequirement = dep.requirement.parse()?;
    if !channelled.is_default_channel() {
        return Err(DependencyError::InvalidRequirement {
            input: dep.requirement.clone(),
            reason: "default dependencies must target the default channel".into(),
        });
    }
    let flat: Requirement = dep.flat_name.parse()?;
    Ok((channelled.requirement, flat))
}
