//! Upgrade chain for blobs written by older handler versions.

use std::collections::{BTreeMap, BTreeSet};

use super::HandlerError;
use crate::bundle::BlobMeta;

/// One upgrade step from `source_version` to `target_version`.
pub trait BlobMigrator: Send + Sync {
    fn source_version(&self) -> &str;

    fn target_version(&self) -> &str;

    fn upgrade(&self, blob: BlobMeta) -> Result<BlobMeta, HandlerError>;
}

/// Steps keyed by the version they upgrade from.
#[derive(Default)]
pub struct MigrationPlan {
    steps: BTreeMap<String, Box<dyn BlobMigrator>>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step<M: BlobMigrator + 'static>(mut self, step: M) -> Self {
        self.steps
            .insert(step.source_version().to_string(), Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply steps until the blob reaches `current`. Runs in memory only;
    /// the bundle on disk is never rewritten.
    pub fn upgrade(
        &self,
        name: &str,
        mut blob: BlobMeta,
        current: &str,
    ) -> Result<BlobMeta, HandlerError> {
        let mut visited = BTreeSet::new();
        while blob.handler_version != current {
            let unsupported = || HandlerError::UnsupportedHandlerVersion {
                name: name.to_string(),
                kind: blob.model_kind.clone(),
                found: blob.handler_version.clone(),
                expected: current.to_string(),
            };
            if !visited.insert(blob.handler_version.clone()) {
                return Err(unsupported());
            }
            let step = self
                .steps
                .get(&blob.handler_version)
                .ok_or_else(unsupported)?;
            tracing::info!(
                blob = name,
                from = step.source_version(),
                to = step.target_version(),
                "migrating blob metadata"
            );
            let target = step.target_version().to_string();
            blob = step.upgrade(blob)?;
            blob.handler_version = target;
        }
        Ok(blob)
    }
}

impl std::fmt::Debug for MigrationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationPlan")
            .field("from", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}
