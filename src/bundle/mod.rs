//! Bundle store: metadata, blob registry, on-disk codec and the packaging
//! session that writes a bundle atomically.

mod blob;
mod codec;
mod metadata;
mod modules;
mod session;

use std::path::PathBuf;
use thiserror::Error;

pub use blob::{validate_blob_name, BlobError, BlobMeta, BlobRegistry};
pub use codec::{
    CodecError, CHANNELLED_ENV_FILE, CODE_DIR, ENV_DIR, FLAT_ENV_FILE, FORMAT_VERSION,
    RECORD_FILE,
};
pub use metadata::ModelMetadata;
pub use modules::{is_embedded, ExtModule, ModuleRegistration};
pub use session::{PackagingSession, SessionOptions};

pub(crate) use codec::copy_path;

use crate::env::{DependencyError, VersionError};
use crate::handlers::HandlerError;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid platform version: {0}")]
    InvalidVersion(#[from] VersionError),

    #[error("Signatures unresolved: give them or save a model with a sample input")]
    SignaturesUnresolved,

    #[error("A packaging session is already open for {0}")]
    SessionActive(PathBuf),

    #[error("Bundle target already exists and is not empty: {0}")]
    BundleExists(PathBuf),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetadataError {
    /// Stable label for load-failure metrics.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::Codec(CodecError::MissingVersion) => "missing_version",
            Self::Codec(CodecError::FormatVersion { .. }) => "format_version",
            Self::Codec(CodecError::Record(_)) => "record",
            Self::Codec(CodecError::EnvFile { .. }) => "env_file",
            Self::Codec(CodecError::Io { .. }) | Self::Io { .. } => "io",
            Self::Handler(_) => "handler",
            Self::Blob(_) => "blob",
            _ => "other",
        }
    }
}
