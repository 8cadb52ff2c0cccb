//! Packaging configuration loading from environment variables.
//!
//! All values are loaded from `MODELPACK_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MODELPACK_PLATFORM_VERSION` | 3.10 | Target platform version recorded in new bundles |
//! | `MODELPACK_SAMPLE_ROWS` | 10 | Max sample rows used for signature inference |
//! | `MODELPACK_INSTALLED_LOCK` | unset | Lock file listing locally installed packages |
//! | `MODELPACK_EMBED_CORE_DEPS` | true | Seed every bundle with the core dependencies |

use std::path::PathBuf;

use crate::env::{ModelDependency, Version};

pub const DEFAULT_PLATFORM_VERSION: &str = "3.10";
pub const DEFAULT_SAMPLE_ROWS: usize = 10;

/// Dependencies every bundle needs at load time, as
/// `(channelled requirement, flat name)`.
pub const CORE_DEPENDENCIES: &[(&str, &str)] = &[
    ("numpy", "numpy"),
    ("pandas", "pandas"),
    ("pyyaml", "pyyaml"),
    ("packaging", "packaging"),
    ("typing-extensions", "typing-extensions"),
    ("cloudpickle", "cloudpickle"),
];

/// Effective packaging configuration.
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    pub platform_version: Version,
    pub sample_rows: usize,
    pub installed_lock: Option<PathBuf>,
    pub embed_core_dependencies: bool,
    pub core_dependencies: Vec<ModelDependency>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            platform_version: default_platform_version(),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            installed_lock: None,
            embed_core_dependencies: true,
            core_dependencies: core_dependencies(),
        }
    }
}

fn default_platform_version() -> Version {
    Version::from_release(&[3, 10])
}

pub fn core_dependencies() -> Vec<ModelDependency> {
    CORE_DEPENDENCIES
        .iter()
        .map(|(req, flat)| ModelDependency::new(*req, *flat))
        .collect()
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn load_platform_version() -> Version {
    match std::env::var("MODELPACK_PLATFORM_VERSION") {
        Ok(val) => match val.trim().parse::<Version>() {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring MODELPACK_PLATFORM_VERSION");
                default_platform_version()
            }
        },
        Err(_) => default_platform_version(),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> PackagerConfig {
    let sample_rows = parse_usize("MODELPACK_SAMPLE_ROWS", DEFAULT_SAMPLE_ROWS);
    let sample_rows = sample_rows.max(1);
    let installed_lock = std::env::var("MODELPACK_INSTALLED_LOCK")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);

    PackagerConfig {
        platform_version: load_platform_version(),
        sample_rows,
        installed_lock,
        embed_core_dependencies: parse_bool("MODELPACK_EMBED_CORE_DEPS", true),
        core_dependencies: core_dependencies(),
    }
}
