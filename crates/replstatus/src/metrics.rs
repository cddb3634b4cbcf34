//! Prometheus-compatible replication status metrics.
//!
//! Exposes ingestion counters, cache counters and the latest successful
//! replication time per project in Prometheus text exposition format.

use crate::cache::CacheStats;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A single Prometheus metric (counter or gauge).
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name (e.g., "replstatus_events_received_total").
    pub name: String,
    /// Help text for the metric.
    pub help: String,
    /// Metric type ("counter" or "gauge").
    pub metric_type: String,
    /// Labels as key=value pairs.
    pub labels: Vec<(String, String)>,
    /// Current value.
    pub value: f64,
}

impl Metric {
    /// Create a new counter metric.
    pub fn counter(name: &str, help: &str, labels: Vec<(String, String)>, value: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            metric_type: "counter".to_string(),
            labels,
            value,
        }
    }

    /// Create a new gauge metric.
    pub fn gauge(name: &str, help: &str, labels: Vec<(String, String)>, value: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            metric_type: "gauge".to_string(),
            labels,
            value,
        }
    }

    fn sample_line(&self) -> String {
        if self.labels.is_empty() {
            format!("{} {}\n", self.name, self.format_value())
        } else {
            let label_str = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{}{{{}}} {}\n", self.name, label_str, self.format_value())
        }
    }

    /// Format this metric with its HELP and TYPE header.
    pub fn format(&self) -> String {
        let mut output = format!("# HELP {} {}\n", self.name, self.help);
        output.push_str(&format!("# TYPE {} {}\n", self.name, self.metric_type));
        output.push_str(&self.sample_line());
        output
    }

    fn format_value(&self) -> String {
        if self.value.fract() == 0.0 && self.value.abs() < 1e15 {
            format!("{}", self.value as i64)
        } else {
            format!("{}", self.value)
        }
    }
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render metrics, emitting HELP/TYPE once per metric family.
pub fn render(metrics: &[Metric]) -> String {
    let mut output = String::new();
    let mut last_name: Option<&str> = None;
    for metric in metrics {
        if last_name != Some(metric.name.as_str()) {
            output.push_str(&format!("# HELP {} {}\n", metric.name, metric.help));
            output.push_str(&format!("# TYPE {} {}\n", metric.name, metric.metric_type));
            last_name = Some(metric.name.as_str());
        }
        output.push_str(&metric.sample_line());
    }
    output
}

/// Live counters updated by the ingestion filter.
#[derive(Debug, Default)]
pub struct StatusMetrics {
    events_received: AtomicU64,
    events_consumed: AtomicU64,
    events_foreign: AtomicU64,
    events_ignored: AtomicU64,
    failures_recorded: AtomicU64,
    unknown_results: AtomicU64,
    latest_replication_ms: AtomicI64,
    latest_by_project: DashMap<String, i64>,
}

impl StatusMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// An event arrived.
    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was written to the cache.
    pub fn record_consumed(&self) {
        self.events_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event from another node was dropped.
    pub fn record_foreign(&self) {
        self.events_foreign.fetch_add(1, Ordering::Relaxed);
    }

    /// An event of an unrecognized shape was dropped.
    pub fn record_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// A failure result was written; `unknown` if the token was unclassifiable.
    pub fn record_failure(&self, unknown: bool) {
        self.failures_recorded.fetch_add(1, Ordering::Relaxed);
        if unknown {
            self.unknown_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A replication of `project` succeeded at `when_ms`.
    pub fn record_success(&self, project: &str, when_ms: i64) {
        self.latest_by_project
            .entry(project.to_string())
            .and_modify(|t| *t = (*t).max(when_ms))
            .or_insert(when_ms);
        self.latest_replication_ms
            .fetch_max(when_ms, Ordering::Relaxed);
    }

    /// Latest successful replication time for `project`.
    pub fn latest_replication_time(&self, project: &str) -> Option<i64> {
        self.latest_by_project.get(project).map(|t| *t)
    }

    /// Latest successful replication time across all projects, 0 if none.
    pub fn global_latest_replication_time(&self) -> i64 {
        self.latest_replication_ms.load(Ordering::Relaxed)
    }

    /// Snapshot of (received, consumed, foreign, ignored) counters.
    pub fn event_counts(&self) -> (u64, u64, u64, u64) {
        (
            self.events_received.load(Ordering::Relaxed),
            self.events_consumed.load(Ordering::Relaxed),
            self.events_foreign.load(Ordering::Relaxed),
            self.events_ignored.load(Ordering::Relaxed),
        )
    }

    /// Produce the full list of Prometheus metrics.
    pub fn to_metrics(&self, cache: &CacheStats) -> Vec<Metric> {
        let (received, consumed, foreign, ignored) = self.event_counts();
        let mut metrics = vec![
            Metric::counter(
                "replstatus_events_received_total",
                "Replication events received",
                vec![],
                received as f64,
            ),
            Metric::counter(
                "replstatus_events_consumed_total",
                "Replication events written to the status cache",
                vec![],
                consumed as f64,
            ),
            Metric::counter(
                "replstatus_events_foreign_total",
                "Replication events discarded because another node generated them",
                vec![],
                foreign as f64,
            ),
            Metric::counter(
                "replstatus_events_ignored_total",
                "Replication events of an unrecognized shape",
                vec![],
                ignored as f64,
            ),
            Metric::counter(
                "replstatus_failures_recorded_total",
                "Failed or unknown replication results recorded",
                vec![],
                self.failures_recorded.load(Ordering::Relaxed) as f64,
            ),
            Metric::counter(
                "replstatus_unknown_results_total",
                "Status tokens that could not be classified",
                vec![],
                self.unknown_results.load(Ordering::Relaxed) as f64,
            ),
            Metric::counter("replstatus_cache_hits_total", "Status cache hits", vec![], cache.hits as f64),
            Metric::counter(
                "replstatus_cache_misses_total",
                "Status cache misses",
                vec![],
                cache.misses as f64,
            ),
            Metric::counter(
                "replstatus_cache_evictions_total",
                "Status cache capacity evictions",
                vec![],
                cache.evictions as f64,
            ),
            Metric::counter(
                "replstatus_cache_expirations_total",
                "Status cache entries expired by age",
                vec![],
                cache.expirations as f64,
            ),
            Metric::gauge(
                "replstatus_cache_entries",
                "Entries currently held in the status cache",
                vec![],
                cache.size as f64,
            ),
            Metric::gauge(
                "replstatus_global_latest_replication_time_ms",
                "Latest successful replication across all projects (ms since epoch)",
                vec![],
                self.global_latest_replication_time() as f64,
            ),
        ];

        let mut per_project: Vec<(String, i64)> = self
            .latest_by_project
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        per_project.sort();
        metrics.extend(per_project.into_iter().map(|(project, when)| {
            Metric::gauge(
                "replstatus_latest_replication_time_ms",
                "Latest successful replication of the project (ms since epoch)",
                vec![("project".to_string(), project)],
                when as f64,
            )
        }));

        metrics
    }
}
