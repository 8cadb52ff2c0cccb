//! Process-wide registry of modules embedded by value.
//!
//! A session marks its extension modules as embedded for its lifetime so
//! that concurrent sessions agree on which sources are captured. The guard
//! only releases the names it registered itself.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

static EMBEDDED: Mutex<BTreeSet<String>> = parking_lot::const_mutex(BTreeSet::new());

/// A local source tree shipped inside the bundle's `code/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtModule {
    pub name: String,
    pub source: PathBuf,
}

impl ExtModule {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Is `name` currently registered for by-value embedding?
pub fn is_embedded(name: &str) -> bool {
    EMBEDDED.lock().contains(name)
}

/// RAII registration of a session's extension modules.
#[derive(Debug)]
pub struct ModuleRegistration {
    modules: Vec<ExtModule>,
    owned: Vec<String>,
}

impl ModuleRegistration {
    /// Register every module not already registered elsewhere.
    pub fn acquire(modules: &[ExtModule]) -> Self {
        let mut table = EMBEDDED.lock();
        let owned = modules
            .iter()
            .filter(|m| table.insert(m.name.clone()))
            .map(|m| m.name.clone())
            .collect::<Vec<_>>();
        if !owned.is_empty() {
            tracing::debug!(modules = ?owned, "registered modules for embedding");
        }
        Self {
            modules: modules.to_vec(),
            owned,
        }
    }

    /// Modules whose sources go into the bundle.
    pub fn modules(&self) -> &[ExtModule] {
        &self.modules
    }
}

impl Drop for ModuleRegistration {
    fn drop(&mut self) {
        if self.owned.is_empty() {
            return;
        }
        let mut table = EMBEDDED.lock();
        for name in &self.owned {
            table.remove(name);
        }
        tracing::debug!(modules = ?self.owned, "released embedded modules");
    }
}
