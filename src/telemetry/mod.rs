//! Telemetry for packaging operations.
//!
//! Provides structured logging, tracing spans and counters through the
//! `metrics` facade. No exporter is installed here; embedding applications
//! choose their own recorder.

mod counters;
mod logging;
mod spans;

pub use counters::{
    record_bundle_loaded, record_bundle_saved, record_dependency_warning, record_load_failure,
    record_session_discarded,
};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{BundleSpan, SpanExt};
