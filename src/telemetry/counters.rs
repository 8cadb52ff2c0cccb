//! Counters emitted through the `metrics` facade.

use metrics::counter;

/// A session closed and its bundle was published.
pub fn record_bundle_saved(model_kind: &str, blobs: usize) {
    counter!("modelpack_bundles_saved_total", "model_kind" => model_kind.to_string()).increment(1);
    counter!("modelpack_blobs_saved_total").increment(blobs as u64);
}

/// A session ended without publishing anything.
pub fn record_session_discarded() {
    counter!("modelpack_sessions_discarded_total").increment(1);
}

pub fn record_bundle_loaded(model_kind: &str) {
    counter!("modelpack_bundles_loaded_total", "model_kind" => model_kind.to_string()).increment(1);
}

/// `reason` is a short stable label such as `format_version`.
pub fn record_load_failure(reason: &'static str) {
    counter!("modelpack_load_failures_total", "reason" => reason).increment(1);
}

pub fn record_dependency_warning(kind: &'static str) {
    counter!("modelpack_dependency_warnings_total", "kind" => kind).increment(1);
}
