//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Backend lifecycle
    describe_histogram!(
        "brig_driver_boot_duration_seconds",
        "Time taken to bring a backend to a ready state (by driver)"
    );
    describe_counter!("brig_driver_boots_total", "Total number of backends booted (by driver)");
    describe_counter!(
        "brig_readiness_retries_total",
        "Total number of failed readiness probes that were retried (by driver)"
    );

    // Builds
    describe_counter!("brig_builds_total", "Total number of solves submitted (by driver, outcome)");
    describe_counter!("brig_build_failures_total", "Total number of failed solves (by driver)");
}

pub fn record_driver_boot(duration_secs: f64, driver: &str) {
    histogram!("brig_driver_boot_duration_seconds", "driver" => driver.to_string())
        .record(duration_secs);
    counter!("brig_driver_boots_total", "driver" => driver.to_string()).increment(1);
}

pub fn record_build(driver: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("brig_builds_total", "driver" => driver.to_string(), "outcome" => outcome)
        .increment(1);
    if !success {
        counter!("brig_build_failures_total", "driver" => driver.to_string()).increment(1);
    }
}
