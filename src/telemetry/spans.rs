//! Span utilities for bundle operations.

use std::path::Path;
use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for bundle spans.
///
/// Fields:
/// - `bundle`: bundle directory
/// - `status`: filled in by `SpanExt::record_result`
/// - `error.message`: filled in on error
/// - `blobs`: number of blobs written or read
pub struct BundleSpan;

impl BundleSpan {
    pub fn save(bundle: &Path, name: &str) -> Span {
        info_span!(
            "bundle_save",
            bundle = %bundle.display(),
            name = %name,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            blobs = tracing::field::Empty,
        )
    }

    pub fn load(bundle: &Path) -> Span {
        info_span!(
            "bundle_load",
            bundle = %bundle.display(),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            blobs = tracing::field::Empty,
        )
    }
}
