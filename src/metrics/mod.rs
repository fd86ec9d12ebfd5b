//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Intent registrations, duplicates and dismissals
//! - Live watchers and settlement polls
//! - Relayed and dropped settlement events

use crate::error::{TrackerError, TrackerResult};
use crate::events::SettlementEvent;
use crate::intent::IntentKind;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

lazy_static! {
    // Registration metrics
    pub static ref INTENTS_REGISTERED: CounterVec = register_counter_vec!(
        "intent_tracker_intents_registered_total",
        "Intents accepted for tracking",
        &["kind"]
    ).expect("register intents_registered");

    pub static ref INTENTS_IGNORED: CounterVec = register_counter_vec!(
        "intent_tracker_intents_ignored_total",
        "Register calls that were no-ops, by reason",
        &["kind", "reason"]
    ).expect("register intents_ignored");

    pub static ref INTENTS_DISMISSED: CounterVec = register_counter_vec!(
        "intent_tracker_intents_dismissed_total",
        "Intents dismissed",
        &["kind"]
    ).expect("register intents_dismissed");

    // Watcher metrics
    pub static ref LIVE_WATCHERS: GaugeVec = register_gauge_vec!(
        "intent_tracker_live_watchers",
        "Watchers currently alive",
        &["kind"]
    ).expect("register live_watchers");

    pub static ref POLLS: CounterVec = register_counter_vec!(
        "intent_tracker_polls_total",
        "Settlement source polls",
        &["kind"]
    ).expect("register polls");

    pub static ref POLL_FAILURES: CounterVec = register_counter_vec!(
        "intent_tracker_poll_failures_total",
        "Failed settlement source polls",
        &["kind"]
    ).expect("register poll_failures");

    // Settlement metrics
    pub static ref SETTLEMENTS_RELAYED: CounterVec = register_counter_vec!(
        "intent_tracker_settlements_relayed_total",
        "Settlement events relayed to subscribers",
        &["kind", "event_type"]
    ).expect("register settlements_relayed");

    pub static ref LATE_SIGNALS_DROPPED: CounterVec = register_counter_vec!(
        "intent_tracker_late_signals_dropped_total",
        "Settlement signals from dismissed watchers",
        &["kind"]
    ).expect("register late_signals_dropped");
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> TrackerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TrackerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TrackerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_registered(kind: IntentKind) {
    INTENTS_REGISTERED.with_label_values(&[kind.name()]).inc();
    LIVE_WATCHERS.with_label_values(&[kind.name()]).inc();
}

pub fn record_duplicate(kind: IntentKind) {
    INTENTS_IGNORED
        .with_label_values(&[kind.name(), "duplicate"])
        .inc();
}

pub fn record_kind_mismatch(kind: IntentKind) {
    INTENTS_IGNORED
        .with_label_values(&[kind.name(), "kind_mismatch"])
        .inc();
}

pub fn record_dismissed(kind: IntentKind) {
    INTENTS_DISMISSED.with_label_values(&[kind.name()]).inc();
    LIVE_WATCHERS.with_label_values(&[kind.name()]).dec();
}

/// Watchers torn down with their tracker rather than by dismissal
pub fn record_watchers_dropped(kind: IntentKind, count: usize) {
    LIVE_WATCHERS
        .with_label_values(&[kind.name()])
        .sub(count as f64);
}

pub fn record_poll(kind: IntentKind) {
    POLLS.with_label_values(&[kind.name()]).inc();
}

pub fn record_poll_failure(kind: IntentKind) {
    POLL_FAILURES.with_label_values(&[kind.name()]).inc();
}

pub fn record_settlement_relayed(kind: IntentKind, event: &SettlementEvent) {
    SETTLEMENTS_RELAYED
        .with_label_values(&[kind.name(), event.name()])
        .inc();
}

pub fn record_late_signal(kind: IntentKind) {
    LATE_SIGNALS_DROPPED.with_label_values(&[kind.name()]).inc();
}
