//! In-memory description of a bundle.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

use super::blob::{BlobError, BlobMeta, BlobRegistry};
use super::codec;
use super::MetadataError;
use crate::data::ModelSignature;
use crate::env::{
    DependencyError, DependencySet, DependencyWarning, InstalledPackages, ModelDependency, Version,
};

/// Everything recorded about one packaged model.
///
/// Created by a packaging session or by [`ModelMetadata::load`]; handlers
/// add blobs and dependencies to it while saving.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    name: String,
    model_kind: String,
    created_at: DateTime<Utc>,
    platform_version: Version,
    signatures: Option<BTreeMap<String, ModelSignature>>,
    metadata: BTreeMap<String, String>,
    dependencies: DependencySet,
    blobs: BlobRegistry,
    extra: serde_json::Map<String, serde_json::Value>,
    warnings: Vec<DependencyWarning>,
}

impl ModelMetadata {
    pub fn new(
        name: impl Into<String>,
        model_kind: impl Into<String>,
        platform_version: Version,
    ) -> Self {
        Self {
            name: name.into(),
            model_kind: model_kind.into(),
            created_at: Utc::now(),
            platform_version,
            signatures: None,
            metadata: BTreeMap::new(),
            dependencies: DependencySet::new(),
            blobs: BlobRegistry::new(),
            extra: serde_json::Map::new(),
            warnings: Vec::new(),
        }
    }

    /// Read a bundle's metadata without touching any blob.
    pub fn load(bundle_dir: &Path) -> Result<Self, MetadataError> {
        Ok(codec::load(bundle_dir)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_kind(&self) -> &str {
        &self.model_kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn platform_version(&self) -> &Version {
        &self.platform_version
    }

    /// `None` until given by the caller or inferred by a handler.
    pub fn signatures(&self) -> Option<&BTreeMap<String, ModelSignature>> {
        self.signatures.as_ref()
    }

    pub fn set_signatures(&mut self, signatures: BTreeMap<String, ModelSignature>) {
        self.signatures = Some(signatures);
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    /// Unknown record fields carried through a load/save cycle.
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.extra
    }

    /// Dependency warnings collected during this session. Not persisted.
    pub fn warnings(&self) -> &[DependencyWarning] {
        &self.warnings
    }

    /// Sorted `channel::requirement` strings.
    pub fn channelled_dependencies(&self) -> Vec<String> {
        self.dependencies.channelled_dependencies()
    }

    /// Sorted flat requirement strings.
    pub fn flat_requirements(&self) -> Vec<String> {
        self.dependencies.flat_requirements()
    }

    pub fn register_blob(&mut self, name: &str, meta: BlobMeta) -> Result<(), BlobError> {
        self.blobs.put(name, meta)?;
        tracing::debug!(bundle = %self.name, blob = name, "blob registered");
        Ok(())
    }

    /// Merge handler dependencies into the set. User entries always win.
    pub fn include_if_absent(
        &mut self,
        dependencies: &[ModelDependency],
        installed: &dyn InstalledPackages,
    ) -> Result<(), DependencyError> {
        let warnings = self.dependencies.include_if_absent(dependencies, installed)?;
        self.warnings.extend(warnings);
        Ok(())
    }

    pub(crate) fn set_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.metadata = metadata;
    }

    pub(crate) fn set_dependencies(
        &mut self,
        dependencies: DependencySet,
        warnings: Vec<DependencyWarning>,
    ) {
        self.dependencies = dependencies;
        self.warnings = warnings;
    }

    pub(crate) fn restore(
        mut self,
        created_at: DateTime<Utc>,
        blobs: BlobRegistry,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.created_at = created_at;
        self.blobs = blobs;
        self.extra = extra;
        self
    }
}

/// Equality over persisted state; session warnings are ignored.
impl PartialEq for ModelMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.model_kind == other.model_kind
            && self.created_at == other.created_at
            && self.platform_version == other.platform_version
            && self.signatures == other.signatures
            && self.metadata == other.metadata
            && self.dependencies == other.dependencies
            && self.blobs == other.blobs
            && self.extra == other.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::InstalledSnapshot;

    fn meta() -> ModelMetadata {
        ModelMetadata::new("m", "custom", "3.10".parse().unwrap())
    }

    #[test]
    fn test_register_blob_rejects_duplicates() {
        let mut meta = meta();
        meta.register_blob("model1", BlobMeta::new("custom", "artifacts", "v1"))
            .unwrap();
        let err = meta
            .register_blob("model1", BlobMeta::new("estimator", "model.json", "v1"))
            .unwrap_err();
        assert_eq!(err, BlobError::Duplicate("model1".into()));
        assert_eq!(meta.blobs().get("model1").unwrap().model_kind, "custom");
    }

    #[test]
    fn test_include_if_absent_records_warnings() {
        let mut meta = meta();
        let (deps, _) = DependencySet::from_user(&["conda-forge::pandas"], &[] as &[&str]).unwrap();
        meta.set_dependencies(deps, Vec::new());
        meta.include_if_absent(&[ModelDependency::same("pandas")], &InstalledSnapshot::new())
            .unwrap();
        assert_eq!(meta.warnings().len(), 1);
        assert_eq!(meta.channelled_dependencies(), vec!["conda-forge::pandas"]);
    }

    #[test]
    fn test_equality_ignores_warnings() {
        let a = meta();
        let mut b = a.clone();
        b.warnings.push(DependencyWarning::PinnedViaFlat {
            name: "numpy".into(),
        });
        assert_eq!(a, b);
    }
}
