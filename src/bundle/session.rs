//! Packaging session: the only way a bundle gets written.
//!
//! Everything is staged in a hidden sibling directory of the target and
//! moved into place by [`PackagingSession::close`]. Dropping a session
//! without closing it, or a failing close, discards the staged content and
//! leaves the target untouched.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::blob::BlobMeta;
use super::codec;
use super::metadata::ModelMetadata;
use super::modules::{ExtModule, ModuleRegistration};
use super::MetadataError;
use crate::data::{DataFrame, ModelSignature};
use crate::env::{DependencySet, Version};
use crate::handlers::{SaveContext, SaveOptions};
use crate::packager::Packager;
use crate::telemetry::{self, BundleSpan, SpanExt};

pub(crate) const STAGING_PREFIX: &str = ".modelpack-staging-";

static ACTIVE: Mutex<BTreeSet<PathBuf>> = parking_lot::const_mutex(BTreeSet::new());

/// Everything the caller supplies when opening a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Bundle name; defaults to the target directory's file name.
    pub name: String,
    pub model_kind: String,
    pub signatures: Option<BTreeMap<String, ModelSignature>>,
    pub metadata: BTreeMap<String, String>,
    /// `channel::requirement` strings; no prefix means the default channel.
    pub channelled_dependencies: Vec<String>,
    pub flat_requirements: Vec<String>,
    /// Overrides the configured platform version. Must parse as a version.
    pub platform_version: Option<String>,
    /// Files or directories copied into `code/`.
    pub code_paths: Vec<PathBuf>,
    pub ext_modules: Vec<ExtModule>,
}

impl SessionOptions {
    pub fn new(name: impl Into<String>, model_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_kind: model_kind.into(),
            ..Self::default()
        }
    }

    pub fn with_signatures(mut self, signatures: BTreeMap<String, ModelSignature>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_channelled<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channelled_dependencies
            .extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_flat<I, S>(mut self, reqs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flat_requirements.extend(reqs.into_iter().map(Into::into));
        self
    }

    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    pub fn with_code_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.code_paths.push(path.into());
        self
    }

    pub fn with_ext_module(mut self, module: ExtModule) -> Self {
        self.ext_modules.push(module);
        self
    }
}

/// Exclusive claim on a target directory for the lifetime of a session.
#[derive(Debug)]
struct BundleClaim {
    key: PathBuf,
}

impl BundleClaim {
    fn acquire(target: &Path) -> Result<Self, MetadataError> {
        let key = if target.is_absolute() {
            target.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| MetadataError::Io {
                    path: target.to_path_buf(),
                    source,
                })?
                .join(target)
        };
        if !ACTIVE.lock().insert(key.clone()) {
            return Err(MetadataError::SessionActive(target.to_path_buf()));
        }
        Ok(Self { key })
    }
}

impl Drop for BundleClaim {
    fn drop(&mut self) {
        ACTIVE.lock().remove(&self.key);
    }
}

/// Staging directory; removed on drop unless published.
struct Staging {
    dir: TempDir,
    published: bool,
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.published {
            tracing::debug!(staging = %self.dir.path().display(), "discarding staged bundle");
            telemetry::record_session_discarded();
        }
    }
}

fn check_target(target: &Path) -> Result<(), MetadataError> {
    if !target.exists() {
        return Ok(());
    }
    let io = |source| MetadataError::Io {
        path: target.to_path_buf(),
        source,
    };
    if !target.is_dir() || fs::read_dir(target).map_err(io)?.next().is_some() {
        return Err(MetadataError::BundleExists(target.to_path_buf()));
    }
    Ok(())
}

/// Open packaging session over one bundle directory.
pub struct PackagingSession<'p> {
    packager: &'p Packager,
    target: PathBuf,
    meta: ModelMetadata,
    code_paths: Vec<PathBuf>,
    staging: Staging,
    modules: ModuleRegistration,
    _claim: BundleClaim,
}

impl<'p> PackagingSession<'p> {
    /// Validate the caller's input, then claim the target and stage.
    ///
    /// Nothing touches the filesystem until the platform version and every
    /// dependency string have been validated.
    pub fn open(
        packager: &'p Packager,
        bundle_dir: &Path,
        options: SessionOptions,
    ) -> Result<Self, MetadataError> {
        let config = packager.config();
        let platform_version = match &options.platform_version {
            Some(raw) => raw.parse::<Version>()?,
            None => config.platform_version.clone(),
        };
        let (dependencies, warnings) = DependencySet::from_user(
            &options.channelled_dependencies,
            &options.flat_requirements,
        )?;

        let target = bundle_dir.to_path_buf();
        check_target(&target)?;
        let claim = BundleClaim::acquire(&target)?;

        let name = if options.name.is_empty() {
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            options.name
        };
        let mut meta = ModelMetadata::new(name, options.model_kind, platform_version);
        if let Some(signatures) = options.signatures {
            meta.set_signatures(signatures);
        }
        meta.set_metadata(options.metadata);
        meta.set_dependencies(dependencies, warnings);
        if config.embed_core_dependencies {
            meta.include_if_absent(&config.core_dependencies, packager.installed())?;
        }

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io = |source| MetadataError::Io {
            path: parent.clone(),
            source,
        };
        fs::create_dir_all(&parent).map_err(io)?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(io)?;

        let modules = ModuleRegistration::acquire(&options.ext_modules);
        tracing::info!(
            bundle = %target.display(),
            name = %meta.name(),
            model_kind = %meta.model_kind(),
            platform_version = %meta.platform_version(),
            "packaging session opened"
        );

        Ok(Self {
            packager,
            target,
            meta,
            code_paths: options.code_paths,
            staging: Staging {
                dir,
                published: false,
            },
            modules,
            _claim: claim,
        })
    }

    pub fn meta(&self) -> &ModelMetadata {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut ModelMetadata {
        &mut self.meta
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Directory blobs are staged into until close.
    pub fn blob_dir(&self) -> &Path {
        self.staging.dir.path()
    }

    pub fn register_blob(&mut self, name: &str, blob: BlobMeta) -> Result<(), MetadataError> {
        Ok(self.meta.register_blob(name, blob)?)
    }

    /// Save `model` as blob `name` with the first capable handler.
    ///
    /// `model` must be the native value itself, not a box around it. A
    /// failed save is rolled back: the metadata returns to its prior state
    /// and anything the handler staged is removed.
    pub fn save_model(
        &mut self,
        name: &str,
        model: &dyn Any,
        sample_input: Option<&DataFrame>,
        options: &SaveOptions,
    ) -> Result<(), MetadataError> {
        let packager = self.packager;
        let snapshot = self.meta.clone();
        let staged_before = self.staged_entries()?;

        let mut ctx = SaveContext {
            meta: &mut self.meta,
            blob_dir: self.staging.dir.path(),
            sample_input,
            is_sub_model: false,
            options,
            registry: packager.registry(),
            installed: packager.installed(),
            sample_rows: packager.config().sample_rows,
        };
        let result = packager.registry().save(&mut ctx, name, model);

        if let Err(err) = result {
            self.meta = snapshot;
            self.discard_staged_since(&staged_before);
            tracing::warn!(blob = name, error = %err, "model save failed, rolled back");
            return Err(err.into());
        }
        Ok(())
    }

    fn staged_entries(&self) -> Result<BTreeSet<OsString>, MetadataError> {
        let dir = self.staging.dir.path();
        let io = |source| MetadataError::Io {
            path: dir.to_path_buf(),
            source,
        };
        fs::read_dir(dir)
            .map_err(io)?
            .map(|entry| entry.map(|e| e.file_name()).map_err(io))
            .collect()
    }

    fn discard_staged_since(&self, before: &BTreeSet<OsString>) {
        let entries = match self.staged_entries() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list staging directory");
                return;
            }
        };
        for entry in entries.difference(before) {
            let path = self.staging.dir.path().join(entry);
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = removed {
                tracing::warn!(path = %path.display(), error = %err, "cannot remove staged blob");
            }
        }
    }

    /// Write the bundle and move it into place.
    pub fn close(mut self) -> Result<ModelMetadata, MetadataError> {
        let span = BundleSpan::save(&self.target, self.meta.name());
        let _enter = span.enter();
        let result = self.publish();
        span.record_result(&result);
        result?;
        span.record("blobs", self.meta.blobs().len());
        Ok(self.meta)
    }

    fn publish(&mut self) -> Result<(), MetadataError> {
        if self.meta.signatures().is_none() {
            return Err(MetadataError::SignaturesUnresolved);
        }
        let staged = self.staging.dir.path();
        codec::save(&self.meta, staged, &self.code_paths, self.modules.modules())?;

        let io = |source| MetadataError::Io {
            path: self.target.clone(),
            source,
        };
        if self.target.exists() {
            fs::remove_dir(&self.target).map_err(io)?;
        }
        fs::rename(staged, &self.target).map_err(io)?;
        self.staging.published = true;

        telemetry::record_bundle_saved(self.meta.model_kind(), self.meta.blobs().len());
        tracing::info!(
            bundle = %self.target.display(),
            blobs = self.meta.blobs().len(),
            "bundle published"
        );
        Ok(())
    }
}
