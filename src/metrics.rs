// =============================================================================
// Process-wide metrics registry
// =============================================================================
//
// Initialized once at startup, before any consumer starts, and never torn
// down except at process exit — the one "global mutable state" the design
// notes (spec.md §9) permit. Every other subsystem emits through the
// `metrics` crate's global recorder rather than holding its own counters, so
// the `/metrics` handler just renders whatever has accumulated.
// =============================================================================

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle whose
/// `render()` produces the `/metrics` response body. Must be called exactly
/// once, before any `metrics::counter!`/`gauge!`/`histogram!` call.
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

// Metric name constants, kept here so a typo doesn't silently split a
// counter across two names.
pub const TICKS_CONSUMED: &str = "scanner_ticks_consumed_total";
pub const TICKS_FAILED: &str = "scanner_ticks_failed_total";
pub const BARS_CONSUMED: &str = "scanner_bars_consumed_total";
pub const BARS_FAILED: &str = "scanner_bars_failed_total";
pub const INDICATOR_UPDATES: &str = "scanner_indicator_updates_total";
pub const INDICATOR_FAILED: &str = "scanner_indicator_updates_failed_total";
pub const INDICATOR_DOUBLE_ENCODED: &str = "scanner_indicator_double_encoded_total";
pub const SCAN_CYCLES: &str = "scanner_scan_cycles_total";
pub const SCAN_CYCLE_OVERRUNS: &str = "scanner_scan_cycle_overruns_total";
pub const SCAN_CYCLE_DURATION_MS: &str = "scanner_scan_cycle_duration_ms";
pub const RULES_EVALUATED: &str = "scanner_rules_evaluated_total";
pub const RULES_MATCHED: &str = "scanner_rules_matched_total";
pub const ALERTS_EMITTED: &str = "scanner_alerts_emitted_total";
pub const ALERTS_PUBLISHED: &str = "scanner_alerts_published_total";
pub const ALERTS_FAILED: &str = "scanner_alerts_failed_total";
pub const RULE_COMPILE_FAILURES: &str = "scanner_rule_compile_failures_total";
pub const RULE_RELOADS: &str = "scanner_rule_reloads_total";
pub const RULE_RELOAD_FAILURES: &str = "scanner_rule_reload_failures_total";
pub const EVALUATION_ERRORS: &str = "scanner_evaluation_errors_total";
pub const REHYDRATED_SYMBOLS: &str = "scanner_rehydrated_symbols_total";
pub const REHYDRATION_FAILURES: &str = "scanner_rehydration_failures_total";
