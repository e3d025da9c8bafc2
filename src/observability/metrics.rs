//! Metrics collection and exposition.
//!
//! # Metrics
//! - `redirect_requests_total` (counter): resolved requests by outcome
//! - `redirect_match_duration_seconds` (histogram): time spent resolving
//! - `redirect_rule_cache_rebuilds_total` (counter)
//! - `redirect_rule_cache_load_failures_total` (counter)
//! - `redirect_active_rules` (gauge): rules in the current snapshot
//! - `redirect_invalid_patterns_total` (counter)
//! - `redirect_chain_fixes_total` (counter): rules rewritten by chain fixing
//! - `redirect_aging_affected_total` (counter): rules retired, by action
//! - `redirect_not_found_total` (counter): unanswered requests logged, by
//!   whether they joined an existing entry
//! - `redirect_not_found_entries` (gauge): size of the 404 log
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and
//!   tests pay nothing
//! - Outcome labels are a closed set to keep cardinality fixed

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::matcher::MatchResult;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn outcome_label(outcome: &MatchResult) -> &'static str {
    match outcome {
        MatchResult::PassThrough => "pass_through",
        MatchResult::Redirect { .. } => "redirect",
        MatchResult::Gone => "gone",
    }
}

pub fn record_match(outcome: &MatchResult, start: Instant) {
    counter!("redirect_requests_total", "outcome" => outcome_label(outcome)).increment(1);
    histogram!("redirect_match_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_rebuild(active_rules: usize) {
    counter!("redirect_rule_cache_rebuilds_total").increment(1);
    gauge!("redirect_active_rules").set(active_rules as f64);
}

pub fn record_cache_load_failure() {
    counter!("redirect_rule_cache_load_failures_total").increment(1);
}

pub fn record_invalid_pattern() {
    counter!("redirect_invalid_patterns_total").increment(1);
}

pub fn record_chain_fixes(rules_updated: usize) {
    counter!("redirect_chain_fixes_total").increment(rules_updated as u64);
}

pub fn record_aging_affected(action: &'static str, count: usize) {
    counter!("redirect_aging_affected_total", "action" => action).increment(count as u64);
}

pub fn record_not_found(grouped: bool) {
    let kind = if grouped { "grouped" } else { "new" };
    counter!("redirect_not_found_total", "entry" => kind).increment(1);
}

pub fn record_not_found_entries(entries: usize) {
    gauge!("redirect_not_found_entries").set(entries as f64);
}
