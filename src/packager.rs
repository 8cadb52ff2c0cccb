//! Entry point tying handlers, installed-package lookup and configuration
//! together.

use std::path::{Path, PathBuf};

use crate::bundle::{MetadataError, ModelMetadata, PackagingSession, SessionOptions};
use crate::config::{self, PackagerConfig};
use crate::env::{DependencyError, InstalledPackages, InstalledSnapshot};
use crate::handlers::{HandlerRegistry, LoadContext, NativeModel, UniformModel};
use crate::telemetry::{self, BundleSpan, SpanExt};

/// The packaging facade.
pub struct Packager {
    registry: HandlerRegistry,
    installed: Box<dyn InstalledPackages>,
    config: PackagerConfig,
}

impl Packager {
    /// Packager with default configuration and nothing installed.
    ///
    /// Default dependencies stay unpinned until an installed-package
    /// snapshot is supplied through [`Packager::with_installed`]; each one
    /// is reported at debug level when it is left unpinned.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            installed: Box::new(InstalledSnapshot::new()),
            config: PackagerConfig::default(),
        }
    }

    /// Packager configured from `MODELPACK_*` environment variables.
    ///
    /// Fails only when `MODELPACK_INSTALLED_LOCK` names an unreadable or
    /// malformed lock file.
    pub fn from_env(registry: HandlerRegistry) -> Result<Self, DependencyError> {
        let config = config::load();
        let installed = match &config.installed_lock {
            Some(path) => InstalledSnapshot::from_lock_file(path)?,
            None => InstalledSnapshot::new(),
        };
        Ok(Self {
            registry,
            installed: Box::new(installed),
            config,
        })
    }

    pub fn with_installed<I: InstalledPackages + 'static>(mut self, installed: I) -> Self {
        self.installed = Box::new(installed);
        self
    }

    pub fn with_config(mut self, config: PackagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn installed(&self) -> &dyn InstalledPackages {
        self.installed.as_ref()
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    pub fn open_session(
        &self,
        bundle_dir: &Path,
        options: SessionOptions,
    ) -> Result<PackagingSession<'_>, MetadataError> {
        PackagingSession::open(self, bundle_dir, options)
    }

    /// Read a bundle's metadata. Blobs are loaded on demand.
    pub fn open_bundle(&self, bundle_dir: &Path) -> Result<LoadedBundle<'_>, MetadataError> {
        let span = BundleSpan::load(bundle_dir);
        let _enter = span.enter();
        let result = ModelMetadata::load(bundle_dir);
        span.record_result(&result);
        let meta = match result {
            Ok(meta) => meta,
            Err(err) => {
                telemetry::record_load_failure(err.reason());
                tracing::warn!(bundle = %bundle_dir.display(), error = %err, "bundle load failed");
                return Err(err);
            }
        };
        span.record("blobs", meta.blobs().len());
        telemetry::record_bundle_loaded(meta.model_kind());
        tracing::info!(
            bundle = %bundle_dir.display(),
            name = %meta.name(),
            blobs = meta.blobs().len(),
            "bundle loaded"
        );
        Ok(LoadedBundle {
            packager: self,
            root: bundle_dir.to_path_buf(),
            meta,
        })
    }
}

/// A bundle whose metadata has been read.
pub struct LoadedBundle<'p> {
    packager: &'p Packager,
    root: PathBuf,
    meta: ModelMetadata,
}

impl<'p> LoadedBundle<'p> {
    pub fn meta(&self) -> &ModelMetadata {
        &self.meta
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn into_meta(self) -> ModelMetadata {
        self.meta
    }

    fn context(&self) -> LoadContext<'_> {
        LoadContext::new(&self.meta, &self.root, self.packager.registry())
    }

    /// Reconstruct blob `name` with the handler recorded for it.
    pub fn load_blob(&self, name: &str) -> Result<NativeModel, MetadataError> {
        Ok(self.packager.registry().load(&self.context(), name)?)
    }

    /// Reconstruct the bundle's main model, the blob named after the bundle.
    pub fn load_model(&self) -> Result<NativeModel, MetadataError> {
        self.load_blob(self.meta.name())
    }

    /// Wrap blob `name` behind the uniform interface.
    pub fn load_uniform_blob(&self, name: &str) -> Result<UniformModel, MetadataError> {
        Ok(self
            .packager
            .registry()
            .load_uniform(&self.context(), name)?)
    }

    /// Wrap the main model behind the uniform interface.
    pub fn load_uniform(&self) -> Result<UniformModel, MetadataError> {
        self.load_uniform_blob(self.meta.name())
    }
}
