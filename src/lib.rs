//! modelpack
//!
//! Self-describing, versioned on-disk bundles for trained models.
//!
//! A bundle records everything needed to rebuild a model elsewhere: its
//! method signatures, the runtime dependencies in two requirement universes
//! (channelled and flat), the target platform version, and one or more
//! blobs written by pluggable handlers.
//!
//! # Flow
//!
//! - [`Packager::open_session`] validates the caller's input and stages a
//!   new bundle next to the target directory.
//! - [`PackagingSession::save_model`] dispatches the model to the first
//!   handler that can package it; the handler writes a blob, resolves
//!   signatures and declares dependencies.
//! - [`PackagingSession::close`] writes the record and environment files and
//!   moves the staged bundle into place. Dropping the session discards it.
//! - [`Packager::open_bundle`] reads the record behind the format-version
//!   gate; blobs are reconstructed on demand by the handler named in each
//!   blob's kind tag.

pub mod bundle;
pub mod config;
pub mod data;
pub mod env;
pub mod handlers;
pub mod packager;
pub mod telemetry;

pub use bundle::{
    BlobError, BlobMeta, BlobRegistry, CodecError, ExtModule, MetadataError, ModelMetadata,
    PackagingSession, SessionOptions, FORMAT_VERSION,
};
pub use config::PackagerConfig;
pub use data::{Column, ColumnData, DataFrame, DataType, FeatureSpec, ModelSignature, Prediction};
pub use env::{
    DependencyError, DependencySet, DependencyWarning, InstalledPackages, InstalledSnapshot,
    ModelDependency, Requirement, Version, VersionError,
};
pub use handlers::{
    CustomHandler, CustomModel, EstimatorHandler, HandlerError, HandlerRegistry, Invocable,
    InvokeError, ModelContext, ModelHandler, SaveOptions, UniformModel,
};
pub use packager::{LoadedBundle, Packager};
