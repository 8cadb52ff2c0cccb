//! Handler for serializable estimators with a fixed method vocabulary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fs;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{
    io_error, resolve_signatures, HandlerError, Invocable, LoadContext, MigrationPlan,
    ModelHandler, SaveContext, UniformModel,
};
use crate::bundle::{BlobMeta, ModelMetadata};
use crate::env::ModelDependency;

pub const ESTIMATOR_KIND: &str = "estimator";
pub const ESTIMATOR_HANDLER_VERSION: &str = "2024-06-01";

/// Methods an estimator may expose as target methods.
pub const DEFAULT_TARGET_METHODS: &[&str] = &[
    "predict",
    "transform",
    "predict_proba",
    "predict_log_proba",
    "decision_function",
];

const MODEL_BLOB_FILE: &str = "model.json";

/// A native model storable by [`EstimatorHandler`].
pub trait Estimator: Invocable + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Estimator for T where T: Invocable + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Stores `M` as JSON at `<blob>/model.json`.
pub struct EstimatorHandler<M> {
    kind: String,
    dependencies: Vec<ModelDependency>,
    migrations: MigrationPlan,
    _model: PhantomData<fn() -> M>,
}

impl<M: Estimator> EstimatorHandler<M> {
    pub fn new() -> Self {
        Self {
            kind: ESTIMATOR_KIND.to_string(),
            dependencies: Vec::new(),
            migrations: MigrationPlan::new(),
            _model: PhantomData,
        }
    }

    /// Override the kind tag; required when several estimator types share
    /// a registry.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Runtime dependencies declared on every save.
    pub fn with_dependencies(mut self, dependencies: Vec<ModelDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_migrations(mut self, migrations: MigrationPlan) -> Self {
        self.migrations = migrations;
        self
    }
}

impl<M: Estimator> Default for EstimatorHandler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Estimator> ModelHandler for EstimatorHandler<M> {
    type Native = M;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn handler_version(&self) -> &str {
        ESTIMATOR_HANDLER_VERSION
    }

    fn allowed_methods(&self, _model: &M) -> Vec<String> {
        DEFAULT_TARGET_METHODS.iter().map(|m| m.to_string()).collect()
    }

    fn can_handle(&self, candidate: &dyn Any) -> bool {
        candidate
            .downcast_ref::<M>()
            .map(|model| DEFAULT_TARGET_METHODS.iter().any(|m| model.has_method(m)))
            .unwrap_or(false)
    }

    fn save(&self, ctx: &mut SaveContext<'_>, name: &str, model: &M) -> Result<(), HandlerError> {
        ctx.ensure_unregistered(name)?;
        let allowed = self.allowed_methods(model);
        resolve_signatures(ctx, model, &allowed)?;

        let blob_path = ctx.blob_path(name);
        fs::create_dir_all(&blob_path).map_err(io_error(&blob_path))?;
        let file = blob_path.join(MODEL_BLOB_FILE);
        let body = serde_json::to_vec_pretty(model)?;
        fs::write(&file, body).map_err(io_error(&file))?;

        ctx.meta.register_blob(
            name,
            BlobMeta::new(&self.kind, MODEL_BLOB_FILE, ESTIMATOR_HANDLER_VERSION),
        )?;
        ctx.include_if_absent(&self.dependencies)?;
        tracing::debug!(blob = name, kind = %self.kind, "estimator saved");
        Ok(())
    }

    fn load(&self, ctx: &LoadContext<'_>, name: &str, blob: &BlobMeta) -> Result<M, HandlerError> {
        let file = ctx.blob_path(name).join(&blob.relative_path);
        let body = fs::read(&file).map_err(io_error(&file))?;
        Ok(serde_json::from_slice(&body)?)
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
