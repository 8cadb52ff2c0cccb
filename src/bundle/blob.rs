//! Registry of the sub-model blobs stored in one bundle.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

use super::codec::{CODE_DIR, ENV_DIR, RECORD_FILE};
use super::session::STAGING_PREFIX;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob already registered: {0}")]
    Duplicate(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Check that `name` can serve as a directory directly under the bundle
/// root without leaving it or shadowing a reserved entry.
pub fn validate_blob_name(name: &str) -> Result<(), BlobError> {
    let invalid = |reason| BlobError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("contains a path separator"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => {}
        _ => return Err(invalid("not a single plain path component")),
    }
    if name == RECORD_FILE || name == ENV_DIR || name == CODE_DIR {
        return Err(invalid("reserved by the bundle layout"));
    }
    if name.starts_with(STAGING_PREFIX) {
        return Err(invalid("reserved for staging directories"));
    }
    Ok(())
}

/// Description of one stored sub-model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Kind tag of the handler that wrote the blob.
    pub model_kind: String,
    /// Handler-defined path, relative to `<bundle>/<blob_name>/`.
    pub relative_path: String,
    /// Artifact name to path relative to the blob directory.
    #[serde(default)]
    pub artifact_map: BTreeMap<String, String>,
    /// Handler-specific options.
    #[serde(default)]
    pub handler_options: BTreeMap<String, String>,
    /// Version of the on-disk layout written by the handler.
    pub handler_version: String,
}

impl BlobMeta {
    pub fn new(
        model_kind: impl Into<String>,
        relative_path: impl Into<String>,
        handler_version: impl Into<String>,
    ) -> Self {
        Self {
            model_kind: model_kind.into(),
            relative_path: relative_path.into(),
            artifact_map: BTreeMap::new(),
            handler_options: BTreeMap::new(),
            handler_version: handler_version.into(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.handler_options.insert(key.into(), value.into());
        self
    }
}

/// Insertion-ordered map of blob name to [`BlobMeta`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobRegistry {
    entries: Vec<(String, BlobMeta)>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blob. Fails if the name is invalid or taken; the first
    /// entry is kept.
    pub fn put(&mut self, name: &str, meta: BlobMeta) -> Result<(), BlobError> {
        validate_blob_name(name)?;
        if self.contains(name) {
            return Err(BlobError::Duplicate(name.to_string()));
        }
        self.entries.push((name.to_string(), meta));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&BlobMeta, BlobError> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, meta)| meta)
            .ok_or_else(|| BlobError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BlobMeta)> {
        self.entries.iter().map(|(name, meta)| (name.as_str(), meta))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Serialize for BlobRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, meta) in &self.entries {
            map.serialize_entry(name, meta)?;
        }
        map.end()
    }
}

struct RegistryVisitor;

impl<'de> Visitor<'de> for RegistryVisitor {
    type Value = BlobRegistry;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of blob name to blob metadata")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut registry = BlobRegistry::new();
        while let Some((name, meta)) = access.next_entry::<String, BlobMeta>()? {
            registry.put(&name, meta).map_err(serde::de::Error::custom)?;
        }
        Ok(registry)
    }
}

impl<'de> Deserialize<'de> for BlobRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RegistryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(kind: &str) -> BlobMeta {
        BlobMeta::new(kind, "model.json", "v1")
    }

    #[test]
    fn test_duplicate_put_keeps_first() {
        let mut registry = BlobRegistry::new();
        registry.put("model1", blob("custom")).unwrap();
        let err = registry.put("model1", blob("estimator")).unwrap_err();
        assert_eq!(err, BlobError::Duplicate("model1".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("model1").unwrap().model_kind, "custom");
    }

    #[test]
    fn test_get_missing() {
        let registry = BlobRegistry::new();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            BlobError::NotFound("nope".into())
        );
    }

    #[test]
    fn test_insertion_order_survives_serialization() {
        let mut registry = BlobRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.put(name, blob("custom")).unwrap();
        }
        let json = serde_json::to_string(&registry).unwrap();
        let back: BlobRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.names(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(back, registry);
    }

    #[test]
    fn test_names_outside_bundle_root_rejected() {
        let mut registry = BlobRegistry::new();
        for name in ["", ".", "..", "../escaped", "/abs", "nested/blob", "a\\b"] {
            assert!(
                matches!(
                    registry.put(name, blob("custom")),
                    Err(BlobError::InvalidName { .. })
                ),
                "{:?} accepted",
                name
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut registry = BlobRegistry::new();
        for name in [RECORD_FILE, ENV_DIR, CODE_DIR, ".modelpack-staging-x1"] {
            assert!(matches!(
                registry.put(name, blob("custom")),
                Err(BlobError::InvalidName { .. })
            ));
        }
        registry.put("model.v2", blob("custom")).unwrap();
        assert_eq!(registry.names(), vec!["model.v2"]);
    }

    #[test]
    fn test_deserialize_rejects_escaping_name() {
        let json = r#"{"../outside": {"model_kind": "custom", "relative_path": "x", "handler_version": "v1"}}"#;
        let err = serde_json::from_str::<BlobRegistry>(json).unwrap_err();
        assert!(err.to_string().contains("Invalid blob name"));
    }
}
