//! Handler for user-defined models built from artifacts and sub-models.
//!
//! A custom model owns a [`ModelContext`]: named artifact files copied into
//! the blob, plus named sub-models that are saved as sibling blobs through
//! the registry and handed back to the model when it is reconstructed.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    io_error, resolve_signatures, HandlerError, Invocable, InvokeError, LoadContext,
    MigrationPlan, ModelHandler, SaveContext, UniformModel,
};
use crate::bundle::{copy_path, BlobMeta, ModelMetadata};
use crate::env::ModelDependency;

pub const CUSTOM_KIND: &str = "custom";
pub const CUSTOM_HANDLER_VERSION: &str = "2024-06-01";

const ARTIFACT_DIR: &str = "artifacts";
const SUB_MODELS_OPTION: &str = "sub_models";

/// Sub-model shared between a custom model and its context.
pub type SharedModel = Arc<dyn Any + Send + Sync>;

/// Artifacts and sub-models a custom model is built from.
#[derive(Clone, Default)]
pub struct ModelContext {
    artifacts: BTreeMap<String, PathBuf>,
    sub_models: BTreeMap<String, SharedModel>,
}

impl ModelContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.insert(name.into(), path.into());
        self
    }

    pub fn with_sub_model<T: Any + Send + Sync>(mut self, name: impl Into<String>, model: T) -> Self {
        self.sub_models.insert(name.into(), Arc::new(model));
        self
    }

    pub fn artifact(&self, name: &str) -> Option<&Path> {
        self.artifacts.get(name).map(PathBuf::as_path)
    }

    pub fn artifacts(&self) -> &BTreeMap<String, PathBuf> {
        &self.artifacts
    }

    pub fn sub_model(&self, name: &str) -> Option<&SharedModel> {
        self.sub_models.get(name)
    }

    /// Typed view of a sub-model.
    pub fn sub_model_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.sub_models.get(name).and_then(|m| m.downcast_ref::<T>())
    }

    pub fn sub_model_names(&self) -> Vec<&str> {
        self.sub_models.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("artifacts", &self.artifacts)
            .field("sub_models", &self.sub_model_names())
            .finish()
    }
}

/// A user model whose methods are enumerated at runtime.
pub trait CustomModel: Invocable + Send + Sync + Sized + 'static {
    /// Methods the model exposes for inference.
    fn inference_methods(&self) -> Vec<String>;

    fn context(&self) -> &ModelContext;

    /// Rebuild the model from a context restored from disk.
    fn from_context(context: ModelContext) -> Result<Self, InvokeError>;
}

pub struct CustomHandler<M> {
    kind: String,
    dependencies: Vec<ModelDependency>,
    migrations: MigrationPlan,
    _model: PhantomData<fn() -> M>,
}

impl<M: CustomModel> CustomHandler<M> {
    pub fn new() -> Self {
        Self {
            kind: CUSTOM_KIND.to_string(),
            dependencies: Vec::new(),
            migrations: MigrationPlan::new(),
            _model: PhantomData,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ModelDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_migrations(mut self, migrations: MigrationPlan) -> Self {
        self.migrations = migrations;
        self
    }
}

impl<M: CustomModel> Default for CustomHandler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CustomModel> ModelHandler for CustomHandler<M> {
    type Native = M;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn handler_version(&self) -> &str {
        CUSTOM_HANDLER_VERSION
    }

    fn allowed_methods(&self, model: &M) -> Vec<String> {
        model.inference_methods()
    }

    fn save(&self, ctx: &mut SaveContext<'_>, name: &str, model: &M) -> Result<(), HandlerError> {
        ctx.ensure_unregistered(name)?;
        let allowed = self.allowed_methods(model);
        resolve_signatures(ctx, model, &allowed)?;

        let context = model.context();
        let artifact_root = ctx.blob_path(name).join(ARTIFACT_DIR);
        fs::create_dir_all(&artifact_root).map_err(io_error(&artifact_root))?;

        let mut artifact_map = BTreeMap::new();
        for (artifact, source) in context.artifacts() {
            let dest = artifact_root.join(artifact);
            copy_path(source, &dest).map_err(io_error(source))?;
            artifact_map.insert(artifact.clone(), format!("{}/{}", ARTIFACT_DIR, artifact));
        }

        let registry = ctx.registry;
        let mut sub_names = Vec::new();
        for (sub_name, sub_model) in &context.sub_models {
            registry.save(&mut ctx.sub_model(), sub_name, &**sub_model)?;
            sub_names.push(sub_name.clone());
        }

        let mut blob = BlobMeta::new(&self.kind, ARTIFACT_DIR, CUSTOM_HANDLER_VERSION);
        blob.artifact_map = artifact_map;
        if !sub_names.is_empty() {
            blob = blob.with_option(SUB_MODELS_OPTION, serde_json::to_string(&sub_names)?);
        }
        ctx.meta.register_blob(name, blob)?;
        ctx.include_if_absent(&self.dependencies)?;
        tracing::debug!(
            blob = name,
            artifacts = context.artifacts().len(),
            sub_models = sub_names.len(),
            "custom model saved"
        );
        Ok(())
    }

    fn load(&self, ctx: &LoadContext<'_>, name: &str, blob: &BlobMeta) -> Result<M, HandlerError> {
        let blob_path = ctx.blob_path(name);
        let mut context = ModelContext::new();

        for (artifact, relative) in &blob.artifact_map {
            let path = blob_path.join(relative);
            if !path.exists() {
                return Err(HandlerError::MissingArtifact {
                    name: artifact.clone(),
                    path,
                });
            }
            context.artifacts.insert(artifact.clone(), path);
        }

        if let Some(raw) = blob.handler_options.get(SUB_MODELS_OPTION) {
            let sub_names: Vec<String> = serde_json::from_str(raw)?;
            for sub_name in sub_names {
                let native = ctx.registry.load(ctx, &sub_name)?;
                context.sub_models.insert(sub_name, Arc::from(native));
            }
        }

        M::from_context(context).map_err(HandlerError::Reconstruct)
    }

    fn to_uniform_interface(
        &self,
        model: M,
        meta: &ModelMetadata,
    ) -> Result<UniformModel, HandlerError> {
        let signatures = meta.signatures().ok_or(HandlerError::MissingSignatures)?;
        Ok(UniformModel::from_invocable(
            &self.kind,
            Arc::new(model),
            signatures,
        ))
    }

    fn migrations(&self) -> Option<&MigrationPlan> {
        Some(&self.migrations)
    }
}
