//! Model handlers: the save/load/wrap contract shared by every model kind.
//!
//! A handler is written against its concrete native type through
//! [`ModelHandler`]. The blanket [`DynHandler`] impl erases that type so
//! heterogeneous handlers live in one ordered [`HandlerRegistry`]:
//!
//! - save dispatches to the first handler whose `can_handle` probe accepts
//!   the candidate value;
//! - load dispatches on the kind tag recorded in the blob's [`BlobMeta`],
//!   so it does not depend on registration order.

pub mod custom;
pub mod estimator;

mod migrate;
mod uniform;

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bundle::{validate_blob_name, BlobError, BlobMeta, ModelMetadata};
use crate::data::{
    default_output_names, infer_signature, truncate, DataError, DataFrame, Prediction,
};
use crate::env::{DependencyError, InstalledPackages, ModelDependency};

pub use custom::{CustomHandler, CustomModel, ModelContext, SharedModel, CUSTOM_KIND};
pub use estimator::{Estimator, EstimatorHandler, DEFAULT_TARGET_METHODS, ESTIMATOR_KIND};
pub use migrate::{BlobMigrator, MigrationPlan};
pub use uniform::{normalize_output, UniformModel};

/// Type-erased native model as returned by load.
pub type NativeModel = Box<dyn Any + Send + Sync>;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("No registered handler can package this model")]
    NoHandler,

    #[error("Unknown model kind: {0}")]
    UnknownModelKind(String),

    #[error("Handler already registered for model kind: {0}")]
    DuplicateKind(String),

    #[error("Model value is not of the type handled by {kind}")]
    CastFailed { kind: String },

    #[error("Method {0} named in signatures is not callable on the model")]
    UnsupportedMethod(String),

    #[error("Target method {method} is invalid: {reason}")]
    InvalidTargetMethod { method: String, reason: String },

    #[error("No target method available on the model")]
    NoTargetMethods,

    #[error("Signatures are neither given nor inferable: sample input required")]
    SampleInputRequired,

    #[error("Bundle carries no signatures")]
    MissingSignatures,

    #[error("Method {method} produced {found} output columns, signature declares {expected}")]
    OutputShape {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Blob {name} written by {kind} handler version {found} cannot be migrated to {expected}")]
    UnsupportedHandlerVersion {
        name: String,
        kind: String,
        found: String,
        expected: String,
    },

    #[error("Blob {0} is its own sub-model, directly or through another blob")]
    SubModelCycle(String),

    #[error("Artifact {name} missing at {path}")]
    MissingArtifact { name: String, path: PathBuf },

    #[error("Invoking {method} failed: {source}")]
    Invoke {
        method: String,
        #[source]
        source: InvokeError,
    },

    #[error("Model reconstruction failed: {0}")]
    Reconstruct(#[source] InvokeError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error raised by a native model method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvokeError(pub String);

impl InvokeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Method table of a native model.
pub trait Invocable {
    fn has_method(&self, method: &str) -> bool;

    fn invoke(&self, method: &str, input: &DataFrame) -> Result<Prediction, InvokeError>;
}

/// Per-call save options.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Methods to infer signatures for; defaults to every allowed method the
    /// model exposes.
    pub target_methods: Option<Vec<String>>,
    /// Free-form handler options.
    pub options: BTreeMap<String, String>,
}

impl SaveOptions {
    pub fn with_target_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }
}

/// Everything a handler may touch while saving one blob.
pub struct SaveContext<'a> {
    pub meta: &'a mut ModelMetadata,
    pub blob_dir: &'a Path,
    pub sample_input: Option<&'a DataFrame>,
    pub is_sub_model: bool,
    pub options: &'a SaveOptions,
    pub registry: &'a HandlerRegistry,
    pub installed: &'a dyn InstalledPackages,
    pub sample_rows: usize,
}

impl<'a> SaveContext<'a> {
    /// `<blob_dir>/<name>`.
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.blob_dir.join(name)
    }

    /// Context for saving a child of the current model.
    pub fn sub_model(&mut self) -> SaveContext<'_> {
        SaveContext {
            meta: &mut *self.meta,
            blob_dir: self.blob_dir,
            sample_input: None,
            is_sub_model: true,
            options: self.options,
            registry: self.registry,
            installed: self.installed,
            sample_rows: self.sample_rows,
        }
    }

    /// Declare runtime dependencies of the model being saved.
    pub fn include_if_absent(&mut self, deps: &[ModelDependency]) -> Result<(), HandlerError> {
        self.meta.include_if_absent(deps, self.installed)?;
        Ok(())
    }

    /// Fail early if `name` is unusable as a blob name or already taken in
    /// this session. Handlers call this before writing anything.
    pub fn ensure_unregistered(&self, name: &str) -> Result<(), HandlerError> {
        validate_blob_name(name)?;
        if self.meta.blobs().contains(name) {
            return Err(BlobError::Duplicate(name.to_string()).into());
        }
        Ok(())
    }
}

/// Read-only view handed to handlers while loading.
pub struct LoadContext<'a> {
    pub meta: &'a ModelMetadata,
    pub blob_dir: &'a Path,
    pub registry: &'a HandlerRegistry,
    loading: RefCell<BTreeSet<String>>,
}

impl<'a> LoadContext<'a> {
    pub fn new(meta: &'a ModelMetadata, blob_dir: &'a Path, registry: &'a HandlerRegistry) -> Self {
        Self {
            meta,
            blob_dir,
            registry,
            loading: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.blob_dir.join(name)
    }

    /// Mark `name` as being loaded until the guard drops.
    fn enter(&self, name: &str) -> Result<LoadingGuard<'_>, HandlerError> {
        if !self.loading.borrow_mut().insert(name.to_string()) {
            return Err(HandlerError::SubModelCycle(name.to_string()));
        }
        Ok(LoadingGuard {
            loading: &self.loading,
            name: name.to_string(),
        })
    }
}

struct LoadingGuard<'c> {
    loading: &'c RefCell<BTreeSet<String>>,
    name: String,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.borrow_mut().remove(&self.name);
    }
}

/// Capability contract implemented once per model kind.
pub trait ModelHandler: Send + Sync + 'static {
    type Native: Any + Send + Sync;

    /// Kind tag recorded in every blob this handler writes.
    fn kind(&self) -> &str;

    /// Version of the on-disk layout this handler writes.
    fn handler_version(&self) -> &str;

    /// Methods this handler accepts as target methods for `model`.
    fn allowed_methods(&self, model: &Self::Native) -> Vec<String>;

    /// Side-effect free probe. Never fails; "no" covers missing capabilities.
    fn can_handle(&self, candidate: &dyn Any) -> bool {
        candidate.is::<Self::Native>()
    }

    fn cast<'m>(&self, candidate: &'m dyn Any) -> Result<&'m Self::Native, HandlerError> {
        candidate
            .downcast_ref::<Self::Native>()
            .ok_or_else(|| HandlerError::CastFailed {
                kind: self.kind().to_string(),
            })
    }

    fn save(
        &self,
        ctx: &mut SaveContext<'_>,
        name: &str,
        model: &Self::Native,
    ) -> Result<(), HandlerError>;

    /// Rebuild the native model from `blob`, already migrated to the
    /// current handler version.
    fn load(
        &self,
        ctx: &LoadContext<'_>,
        name: &str,
        blob: &BlobMeta,
    ) -> Result<Self::Native, HandlerError>;

    fn to_uniform_interface(
        &self,
        model: Self::Native,
        meta: &ModelMetadata,
    ) -> Result<UniformModel, HandlerError>;

    /// Upgrade steps for blobs written by older handler versions.
    fn migrations(&self) -> Option<&MigrationPlan> {
        None
    }
}

/// Object-safe view of a [`ModelHandler`].
pub trait DynHandler: Send + Sync {
    fn kind(&self) -> &str;

    fn handler_version(&self) -> &str;

    fn can_handle(&self, candidate: &dyn Any) -> bool;

    fn save_erased(
        &self,
        ctx: &mut SaveContext<'_>,
        name: &str,
        candidate: &dyn Any,
    ) -> Result<(), HandlerError>;

    fn load_erased(&self, ctx: &LoadContext<'_>, name: &str) -> Result<NativeModel, HandlerError>;

    fn uniform_erased(
        &self,
        native: NativeModel,
        meta: &ModelMetadata,
    ) -> Result<UniformModel, HandlerError>;
}

impl<H: ModelHandler> DynHandler for H {
    fn kind(&self) -> &str {
        ModelHandler::kind(self)
    }

    fn handler_version(&self) -> &str {
        ModelHandler::handler_version(self)
    }

    fn can_handle(&self, candidate: &dyn Any) -> bool {
        ModelHandler::can_handle(self, candidate)
    }

    fn save_erased(
        &self,
        ctx: &mut SaveContext<'_>,
        name: &str,
        candidate: &dyn Any,
    ) -> Result<(), HandlerError> {
        let model = self.cast(candidate)?;
        self.save(ctx, name, model)
    }

    fn load_erased(&self, ctx: &LoadContext<'_>, name: &str) -> Result<NativeModel, HandlerError> {
        let blob = ctx.meta.blobs().get(name)?.clone();
        let current = ModelHandler::handler_version(self);
        let blob = if blob.handler_version == current {
            blob
        } else {
            let plan = self
                .migrations()
                .ok_or_else(|| HandlerError::UnsupportedHandlerVersion {
                    name: name.to_string(),
                    kind: blob.model_kind.clone(),
                    found: blob.handler_version.clone(),
                    expected: current.to_string(),
                })?;
            plan.upgrade(name, blob, current)?
        };
        let native = self.load(ctx, name, &blob)?;
        Ok(Box::new(native))
    }

    fn uniform_erased(
        &self,
        native: NativeModel,
        meta: &ModelMetadata,
    ) -> Result<UniformModel, HandlerError> {
        let model = native
            .downcast::<H::Native>()
            .map_err(|_| HandlerError::CastFailed {
                kind: ModelHandler::kind(self).to_string(),
            })?;
        self.to_uniform_interface(*model, meta)
    }
}

/// Ordered collection of handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Probe order for save follows registration order.
    pub fn register<H: ModelHandler>(&mut self, handler: H) -> Result<(), HandlerError> {
        let kind = ModelHandler::kind(&handler);
        if self.handlers.iter().any(|h| h.kind() == kind) {
            return Err(HandlerError::DuplicateKind(kind.to_string()));
        }
        self.handlers.push(Box::new(handler));
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First handler whose probe accepts `candidate`.
    pub fn find_for(&self, candidate: &dyn Any) -> Result<&dyn DynHandler, HandlerError> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(candidate))
            .map(|h| h.as_ref())
            .ok_or(HandlerError::NoHandler)
    }

    pub fn by_kind(&self, kind: &str) -> Result<&dyn DynHandler, HandlerError> {
        self.handlers
            .iter()
            .find(|h| h.kind() == kind)
            .map(|h| h.as_ref())
            .ok_or_else(|| HandlerError::UnknownModelKind(kind.to_string()))
    }

    /// Save `candidate` under `name` with the first capable handler.
    pub fn save(
        &self,
        ctx: &mut SaveContext<'_>,
        name: &str,
        candidate: &dyn Any,
    ) -> Result<(), HandlerError> {
        validate_blob_name(name)?;
        let handler = self.find_for(candidate)?;
        tracing::debug!(
            blob = name,
            kind = handler.kind(),
            sub_model = ctx.is_sub_model,
            "dispatching save"
        );
        handler.save_erased(ctx, name, candidate)
    }

    /// Load blob `name` with the handler recorded for it.
    pub fn load(&self, ctx: &LoadContext<'_>, name: &str) -> Result<NativeModel, HandlerError> {
        let kind = ctx.meta.blobs().get(name)?.model_kind.clone();
        let handler = self.by_kind(&kind)?;
        let _loading = ctx.enter(name)?;
        tracing::debug!(blob = name, kind = %kind, "dispatching load");
        handler.load_erased(ctx, name)
    }

    /// Load blob `name` and wrap it behind the uniform interface.
    pub fn load_uniform(
        &self,
        ctx: &LoadContext<'_>,
        name: &str,
    ) -> Result<UniformModel, HandlerError> {
        let kind = ctx.meta.blobs().get(name)?.model_kind.clone();
        let handler = self.by_kind(&kind)?;
        let native = {
            let _loading = ctx.enter(name)?;
            handler.load_erased(ctx, name)?
        };
        handler.uniform_erased(native, ctx.meta)
    }
}

/// Allowed methods the model actually exposes.
pub fn default_target_methods(model: &dyn Invocable, allowed: &[String]) -> Vec<String> {
    allowed
        .iter()
        .filter(|m| model.has_method(m))
        .cloned()
        .collect()
}

/// A target method must be in the handler's allowed set and callable.
pub fn validate_target_methods(
    model: &dyn Invocable,
    allowed: &[String],
    methods: &[String],
) -> Result<(), HandlerError> {
    for method in methods {
        if !allowed.contains(method) {
            return Err(HandlerError::InvalidTargetMethod {
                method: method.clone(),
                reason: "not supported by handler".into(),
            });
        }
        if !model.has_method(method) {
            return Err(HandlerError::InvalidTargetMethod {
                method: method.clone(),
                reason: "not callable".into(),
            });
        }
    }
    Ok(())
}

/// Validate explicit signatures or infer them from the sample input.
///
/// Sub-models never carry signatures of their own.
pub fn resolve_signatures(
    ctx: &mut SaveContext<'_>,
    model: &dyn Invocable,
    allowed: &[String],
) -> Result<(), HandlerError> {
    if ctx.is_sub_model {
        return Ok(());
    }

    if let Some(signatures) = ctx.meta.signatures() {
        for method in signatures.keys() {
            if !model.has_method(method) {
                return Err(HandlerError::UnsupportedMethod(method.clone()));
            }
            if !allowed.contains(method) {
                return Err(HandlerError::InvalidTargetMethod {
                    method: method.clone(),
                    reason: "not supported by handler".into(),
                });
            }
        }
        return Ok(());
    }

    let sample = ctx.sample_input.ok_or(HandlerError::SampleInputRequired)?;
    let methods = match &ctx.options.target_methods {
        Some(methods) => {
            validate_target_methods(model, allowed, methods)?;
            methods.clone()
        }
        None => default_target_methods(model, allowed),
    };
    if methods.is_empty() {
        return Err(HandlerError::NoTargetMethods);
    }

    let sample = truncate(sample, ctx.sample_rows);
    let mut signatures = BTreeMap::new();
    for method in methods {
        let prediction = model
            .invoke(&method, &sample)
            .map_err(|source| HandlerError::Invoke {
                method: method.clone(),
                source,
            })?;
        let labels = prediction.labels();
        let columns = prediction.into_columns();
        let names = labels.unwrap_or_else(|| default_output_names(columns.len()));
        let output = DataFrame::from_unlabeled(&names, columns)?;
        signatures.insert(method, infer_signature(&sample, &output));
    }
    tracing::debug!(methods = signatures.len(), "inferred signatures");
    ctx.meta.set_signatures(signatures);
    Ok(())
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HandlerError + '_ {
    move |source| HandlerError::Io {
        path: path.to_path_buf(),
        source,
    }
}
