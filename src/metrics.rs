// src/metrics.rs
//! Metric names used across the relay, registered once so they show up with
//! descriptions on whatever recorder the host process installs.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub const ITEMS_DELIVERED_TOTAL: &str = "relay_items_delivered_total";
pub const ITEMS_SKIPPED_TOTAL: &str = "relay_items_skipped_total";
pub const ITEMS_FAILED_TOTAL: &str = "relay_items_failed_total";
pub const SOURCE_ERRORS_TOTAL: &str = "relay_source_errors_total";
pub const RETRIES_TOTAL: &str = "relay_retries_total";
pub const CYCLE_LAST_RUN_TS: &str = "relay_cycle_last_run_ts";

pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(ITEMS_DELIVERED_TOTAL, "Items delivered to at least one destination.");
        describe_counter!(
            ITEMS_SKIPPED_TOTAL,
            "Items skipped by content policy or missing content."
        );
        describe_counter!(ITEMS_FAILED_TOTAL, "Items that failed enrichment or delivery.");
        describe_counter!(SOURCE_ERRORS_TOTAL, "Source listing failures.");
        describe_counter!(RETRIES_TOTAL, "Retried external calls.");
        describe_gauge!(CYCLE_LAST_RUN_TS, "Unix ts when the last poll cycle finished.");
    });
}
