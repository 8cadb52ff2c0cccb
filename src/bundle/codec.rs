//! On-disk layout of a bundle.
//!
//! ```text
//! <bundle>/
//!   metadata.record        JSON record, carries format_version
//!   env/channelled.env     TOML: platform_version + [channels]
//!   env/flat.env           one flat requirement per line
//!   code/                  code paths and by-value modules
//!   <blob_name>/...        handler-defined blob content
//! ```
//!
//! The record's format version is checked before any other field is
//! interpreted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::blob::BlobRegistry;
use super::metadata::ModelMetadata;
use super::modules::ExtModule;
use crate::data::ModelSignature;
use crate::env::{DependencySet, Requirement, Version};

pub const FORMAT_VERSION: u64 = 1;

pub const RECORD_FILE: &str = "metadata.record";
pub const ENV_DIR: &str = "env";
pub const CHANNELLED_ENV_FILE: &str = "channelled.env";
pub const FLAT_ENV_FILE: &str = "flat.env";
pub const CODE_DIR: &str = "code";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Bundle record has no format_version")]
    MissingVersion,

    #[error("Unsupported bundle format version {found}, expected {expected}")]
    FormatVersion { found: String, expected: u64 },

    #[error("Signatures unresolved: nothing to write")]
    SignaturesUnresolved,

    #[error("Malformed bundle record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Malformed environment file {path}: {reason}")]
    EnvFile { path: PathBuf, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CodecError + '_ {
    move |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataRecord {
    format_version: u64,
    name: String,
    model_kind: String,
    created_at: DateTime<Utc>,
    target_platform_version: Version,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    signatures: BTreeMap<String, ModelSignature>,
    #[serde(default)]
    blobs: BlobRegistry,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct ChannelledEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    platform_version: Option<Version>,
    #[serde(default)]
    channels: BTreeMap<String, Vec<String>>,
}

/// Write the record, environment files and embedded code into `dir`.
pub fn save(
    meta: &ModelMetadata,
    dir: &Path,
    code_paths: &[PathBuf],
    modules: &[ExtModule],
) -> Result<(), CodecError> {
    let signatures = meta.signatures().ok_or(CodecError::SignaturesUnresolved)?;
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let record = MetadataRecord {
        format_version: FORMAT_VERSION,
        name: meta.name().to_string(),
        model_kind: meta.model_kind().to_string(),
        created_at: meta.created_at(),
        target_platform_version: meta.platform_version().clone(),
        metadata: meta.metadata().clone(),
        signatures: signatures.clone(),
        blobs: meta.blobs().clone(),
        extra: meta.extra().clone(),
    };
    let record_path = dir.join(RECORD_FILE);
    fs::write(&record_path, serde_json::to_string_pretty(&record)?)
        .map_err(io_error(&record_path))?;

    write_env(meta.dependencies(), meta.platform_version(), &dir.join(ENV_DIR))?;

    if !code_paths.is_empty() || !modules.is_empty() {
        let code_dir = dir.join(CODE_DIR);
        fs::create_dir_all(&code_dir).map_err(io_error(&code_dir))?;
        for source in code_paths {
            let name = source.file_name().ok_or_else(|| CodecError::Io {
                path: source.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
            })?;
            copy_path(source, &code_dir.join(name)).map_err(io_error(source))?;
        }
        for module in modules {
            copy_path(&module.source, &code_dir.join(&module.name))
                .map_err(io_error(&module.source))?;
        }
    }
    Ok(())
}

fn write_env(deps: &DependencySet, platform: &Version, env_dir: &Path) -> Result<(), CodecError> {
    fs::create_dir_all(env_dir).map_err(io_error(env_dir))?;

    let channelled = ChannelledEnv {
        platform_version: Some(platform.clone()),
        channels: deps
            .channels()
            .map(|(chan, reqs)| {
                let mut lines: Vec<String> = reqs.iter().map(Requirement::to_string).collect();
                lines.sort();
                (chan.to_string(), lines)
            })
            .collect(),
    };
    let path = env_dir.join(CHANNELLED_ENV_FILE);
    let body = toml::to_string(&channelled).map_err(|e| CodecError::EnvFile {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    fs::write(&path, body).map_err(io_error(&path))?;

    let path = env_dir.join(FLAT_ENV_FILE);
    let mut body = deps.flat_requirements().join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(&path, body).map_err(io_error(&path))?;
    Ok(())
}

/// Read a bundle's metadata. Blobs are not touched.
pub fn load(dir: &Path) -> Result<ModelMetadata, CodecError> {
    let record_path = dir.join(RECORD_FILE);
    let raw = fs::read_to_string(&record_path).map_err(io_error(&record_path))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    match value.get("format_version") {
        None => return Err(CodecError::MissingVersion),
        Some(found) if found.as_u64() != Some(FORMAT_VERSION) => {
            return Err(CodecError::FormatVersion {
                found: found.to_string(),
                expected: FORMAT_VERSION,
            })
        }
        Some(_) => {}
    }

    let record: MetadataRecord = serde_json::from_value(value)?;

    let env_dir = dir.join(ENV_DIR);
    let (deps, env_platform) = read_env(&env_dir)?;
    let platform = env_platform.unwrap_or(record.target_platform_version);

    let mut meta = ModelMetadata::new(record.name, record.model_kind, platform);
    meta.set_signatures(record.signatures);
    meta.set_metadata(record.metadata);
    meta.set_dependencies(deps, Vec::new());
    Ok(meta.restore(record.created_at, record.blobs, record.extra))
}

fn read_env(env_dir: &Path) -> Result<(DependencySet, Option<Version>), CodecError> {
    let path = env_dir.join(CHANNELLED_ENV_FILE);
    let channelled = if path.exists() {
        let raw = fs::read_to_string(&path).map_err(io_error(&path))?;
        toml::from_str::<ChannelledEnv>(&raw).map_err(|e| CodecError::EnvFile {
            path: path.clone(),
            reason: e.to_string(),
        })?
    } else {
        ChannelledEnv::default()
    };

    let mut channels = BTreeMap::new();
    for (chan, lines) in channelled.channels {
        let reqs = lines
            .iter()
            .map(|line| line.parse::<Requirement>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CodecError::EnvFile {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        channels.insert(chan, reqs);
    }

    let path = env_dir.join(FLAT_ENV_FILE);
    let mut flat = Vec::new();
    if path.exists() {
        let raw = fs::read_to_string(&path).map_err(io_error(&path))?;
        for line in raw.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let req = line.parse::<Requirement>().map_err(|e| CodecError::EnvFile {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            flat.push(req);
        }
    }

    Ok((
        DependencySet::from_parts(channels, flat),
        channelled.platform_version,
    ))
}

/// Copy a file or a directory tree to `dest`.
pub(crate) fn copy_path(source: &Path, dest: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_path(&entry.path(), &dest.join(entry.file_name()))?;
        }
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BlobMeta;
    use crate::data::{DataType, FeatureSpec};
    use crate::env::{InstalledSnapshot, ModelDependency};

    fn sample_meta() -> ModelMetadata {
        let mut meta = ModelMetadata::new("m", "custom", "3.10".parse().unwrap());
        meta.set_signatures(BTreeMap::from([(
            "predict".to_string(),
            ModelSignature::new(
                vec![FeatureSpec::new("input", DataType::Double)],
                vec![FeatureSpec::new("output", DataType::Double)],
            ),
        )]));
        let (deps, _) =
            DependencySet::from_user(&["conda-forge::lightgbm", "numpy==1.26.4"], &["torch"])
                .unwrap();
        meta.set_dependencies(deps, Vec::new());
        meta.include_if_absent(&[ModelDependency::same("pandas")], &InstalledSnapshot::new())
            .unwrap();
        meta.register_blob("model1", BlobMeta::new("custom", "artifacts", "v1"))
            .unwrap();
        meta
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let meta = sample_meta();
        save(&meta, dir.path(), &[], &[]).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(
            loaded.channelled_dependencies(),
            vec!["conda-forge::lightgbm", "numpy==1.26.4", "pandas"]
        );
    }

    #[test]
    fn test_missing_format_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RECORD_FILE), r#"{"name": "m"}"#).unwrap();
        assert!(matches!(load(dir.path()), Err(CodecError::MissingVersion)));
    }

    #[test]
    fn test_newer_format_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_meta(), dir.path(), &[], &[]).unwrap();
        let path = dir.path().join(RECORD_FILE);
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["format_version"] = serde_json::json!(2);
        fs::write(&path, value.to_string()).unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(CodecError::FormatVersion { expected: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_meta(), dir.path(), &[], &[]).unwrap();
        let path = dir.path().join(RECORD_FILE);
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["labels"] = serde_json::json!({"team": "ranking"});
        fs::write(&path, value.to_string()).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.extra()["labels"]["team"], "ranking");

        let again = tempfile::tempdir().unwrap();
        save(&loaded, again.path(), &[], &[]).unwrap();
        assert_eq!(load(again.path()).unwrap().extra(), loaded.extra());
    }

    #[test]
    fn test_env_platform_version_wins() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_meta(), dir.path(), &[], &[]).unwrap();
        let env = dir.path().join(ENV_DIR).join(CHANNELLED_ENV_FILE);
        let raw = fs::read_to_string(&env).unwrap();
        fs::write(&env, raw.replace("3.10", "3.11")).unwrap();
        assert_eq!(load(dir.path()).unwrap().platform_version().to_string(), "3.11");
    }

    #[test]
    fn test_unresolved_signatures_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ModelMetadata::new("m", "custom", "3.10".parse().unwrap());
        assert!(matches!(
            save(&meta, dir.path(), &[], &[]),
            Err(CodecError::SignaturesUnresolved)
        ));
        assert!(!dir.path().join(RECORD_FILE).exists());
    }
}
