// In-process relay counters, rendered in Prometheus text format at `/metrics`.
//
// The hub and socket tasks record through the free functions below, which
// are no-ops until `set_global_metrics` has installed an instance.

use std::{
    fmt::Write as _,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use crate::session::DeviceStatus;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    connections_accepted_total: AtomicU64,
    registrations_active_player_total: AtomicU64,
    registrations_standby_player_total: AtomicU64,
    registrations_remote_total: AtomicU64,
    registrations_rejected_total: AtomicU64,
    presenter_switches_total: AtomicU64,
    messages_relayed_total: AtomicU64,
    messages_dropped_total: AtomicU64,
    frames_rejected_total: AtomicU64,
    active_sessions: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn increment_connections_accepted() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_connections_accepted();
    }
}

pub fn record_registration(status: DeviceStatus) {
    if let Some(metrics) = global_metrics() {
        metrics.record_registration(status);
    }
}

pub fn increment_registrations_rejected() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_registrations_rejected();
    }
}

pub fn increment_presenter_switches() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_presenter_switches();
    }
}

pub fn record_broadcast(relayed: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_broadcast(relayed);
    }
}

pub fn increment_frames_rejected() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_frames_rejected();
    }
}

pub fn set_active_sessions(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_sessions(count);
    }
}

impl RelayMetrics {
    pub fn increment_connections_accepted(&self) {
        self.connections_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self, status: DeviceStatus) {
        let counter = match status {
            DeviceStatus::ActivePlayer => &self.registrations_active_player_total,
            DeviceStatus::StandbyPlayer => &self.registrations_standby_player_total,
            DeviceStatus::Remote => &self.registrations_remote_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_registrations_rejected(&self) {
        self.registrations_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_presenter_switches(&self) {
        self.presenter_switches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, relayed: bool) {
        let counter =
            if relayed { &self.messages_relayed_total } else { &self.messages_dropped_total };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_rejected(&self) {
        self.frames_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.store(count as u64, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        append_metric(
            &mut output,
            "relay_connections_accepted_total",
            "Total WebSocket connections accepted.",
            "counter",
            &[("", &self.connections_accepted_total)],
        );
        append_metric(
            &mut output,
            "relay_registrations_total",
            "Successful registrations by assigned status.",
            "counter",
            &[
                ("status=\"active_player\"", &self.registrations_active_player_total),
                ("status=\"standby_player\"", &self.registrations_standby_player_total),
                ("status=\"remote\"", &self.registrations_remote_total),
            ],
        );
        append_metric(
            &mut output,
            "relay_registrations_rejected_total",
            "Registrations refused for missing or invalid identity.",
            "counter",
            &[("", &self.registrations_rejected_total)],
        );
        append_metric(
            &mut output,
            "relay_presenter_switches_total",
            "Completed presenter switches.",
            "counter",
            &[("", &self.presenter_switches_total)],
        );
        append_metric(
            &mut output,
            "relay_messages_relayed_total",
            "Inbound messages admitted and fanned out.",
            "counter",
            &[("", &self.messages_relayed_total)],
        );
        append_metric(
            &mut output,
            "relay_messages_dropped_total",
            "Inbound messages dropped by broadcast admission.",
            "counter",
            &[("", &self.messages_dropped_total)],
        );
        append_metric(
            &mut output,
            "relay_frames_rejected_total",
            "Inbound frames that could not be decoded.",
            "counter",
            &[("", &self.frames_rejected_total)],
        );
        append_metric(
            &mut output,
            "relay_active_sessions",
            "Sessions currently held in the registry.",
            "gauge",
            &[("", &self.active_sessions)],
        );

        output
    }
}

fn append_metric(
    output: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    series: &[(&str, &AtomicU64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {kind}");
    for (labels, value) in series {
        let value = value.load(Ordering::Relaxed);
        if labels.is_empty() {
            let _ = writeln!(output, "{name} {value}");
        } else {
            let _ = writeln!(output, "{name}{{{labels}}} {value}");
        }
    }
}
