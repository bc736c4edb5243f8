//! Optional metrics instrumentation.
//!
//! With the `observe` feature enabled, dump and restore emit counters and
//! histograms through the [`metrics`] crate; a downstream application must
//! install a recorder to collect them. Without the feature every function
//! here is a no-op.

use std::time::Duration;

/// Record one collection written to an archive.
///
/// - `cairn.dump.collections_total`
/// - `cairn.dump.documents_total`
/// - `cairn.dump.collection_duration_seconds`
#[inline]
pub fn record_collection_dumped(documents: u64, duration: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("cairn.dump.collections_total").increment(1);
        metrics::counter!("cairn.dump.documents_total").increment(documents);
        metrics::histogram!("cairn.dump.collection_duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (documents, duration);
    }
}

/// Record one collection loaded into a target.
///
/// - `cairn.restore.documents_total` with `outcome` label
///   (`inserted` / `skipped` / `filtered` / `failed`)
#[inline]
pub fn record_collection_restored(inserted: u64, skipped: u64, filtered: u64, failed: u64) {
    #[cfg(feature = "observe")]
    {
        for (outcome, n) in [
            ("inserted", inserted),
            ("skipped", skipped),
            ("filtered", filtered),
            ("failed", failed),
        ] {
            metrics::counter!("cairn.restore.documents_total", "outcome" => outcome).increment(n);
        }
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (inserted, skipped, filtered, failed);
    }
}

/// Record operation log records captured or replayed.
///
/// - `cairn.oplog.records_total` with `stage` label (`captured` / `applied` / `skipped`)
#[inline]
pub fn record_oplog(stage: &'static str, records: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("cairn.oplog.records_total", "stage" => stage).increment(records);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (stage, records);
    }
}

/// Record a finished run.
///
/// - `cairn.run.total` with `command` and `outcome` labels
/// - `cairn.run.duration_seconds`
#[inline]
pub fn record_run(command: &'static str, duration: Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("cairn.run.total", "command" => command, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("cairn.run.duration_seconds", "command" => command)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (command, duration, success);
    }
}

/// Record a connection retry.
///
/// - `cairn.connect.retries_total`
#[inline]
pub fn record_connect_retry() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("cairn.connect.retries_total").increment(1);
    }
}
