//! Event ingestion: filters replication events down to those generated by this
//! node and records their outcome in the status cache.

use crate::cache::StatusCache;
use crate::event::{EventRecord, ReplicationEvent};
use crate::metrics::StatusMetrics;
use crate::status::ReplicationResult;
use std::sync::Arc;

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Written to the cache.
    Recorded,
    /// Generated by another node.
    Foreign,
    /// Not a status-bearing event.
    Ignored,
}

/// Consumes replication events and writes their status into the cache.
///
/// Safe to share between worker threads; all state lives in the cache and the
/// metrics, both of which synchronize internally.
#[derive(Debug, Clone)]
pub struct EventIngestor {
    cache: Arc<StatusCache>,
    metrics: Arc<StatusMetrics>,
    instance_id: Option<String>,
}

impl EventIngestor {
    /// Create an ingestor for the node identified by `instance_id`.
    ///
    /// An empty identifier is treated as unset.
    pub fn new(
        cache: Arc<StatusCache>,
        metrics: Arc<StatusMetrics>,
        instance_id: Option<String>,
    ) -> Self {
        Self {
            cache,
            metrics,
            instance_id: instance_id.filter(|id| !id.is_empty()),
        }
    }

    /// Local node identifier.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// An event belongs to this node iff its origin equals the local
    /// identifier, with "unset" equal only to "unset".
    pub fn is_generated_by_this_instance(&self, origin: Option<&str>) -> bool {
        self.instance_id.as_deref() == origin.filter(|o| !o.is_empty())
    }

    /// Ingest a raw record.
    pub fn on_event(&self, record: EventRecord) -> IngestOutcome {
        self.metrics.record_received();

        if !self.is_generated_by_this_instance(record.origin_node_id.as_deref()) {
            tracing::debug!(
                origin = ?record.origin_node_id,
                local = ?self.instance_id,
                "discarding replication event from another node"
            );
            self.metrics.record_foreign();
            return IngestOutcome::Foreign;
        }

        match ReplicationEvent::classify(record) {
            Some(event) => self.record(&event),
            None => {
                tracing::debug!("ignoring replication event without status");
                self.metrics.record_ignored();
                IngestOutcome::Ignored
            }
        }
    }

    fn record(&self, event: &ReplicationEvent) -> IngestOutcome {
        let (key, value) = event.to_entry();

        if value.status == ReplicationResult::Succeeded {
            self.metrics.record_success(key.project(), value.when);
        } else if value.is_failure() {
            self.metrics
                .record_failure(value.status == ReplicationResult::Unknown);
        }

        tracing::debug!(
            project = key.project(),
            destination = key.destination(),
            ref_name = key.ref_name(),
            status = %value.status,
            when = value.when,
            "recording replication status"
        );
        self.cache.put(key, value);
        self.metrics.record_consumed();
        IngestOutcome::Recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::event::REF_REPLICATED;
    use crate::status::{StatusKey, StatusValue};

    fn ingestor(instance_id: Option<&str>) -> EventIngestor {
        EventIngestor::new(
            Arc::new(StatusCache::new(&CacheConfig::default())),
            Arc::new(StatusMetrics::new()),
            instance_id.map(str::to_string),
        )
    }

    fn event(origin: Option<&str>, status: &str, when: i64) -> EventRecord {
        EventRecord {
            event_type: Some(REF_REPLICATED.to_string()),
            project: Some("demo".into()),
            ref_name: Some("refs/heads/master".into()),
            destination: Some("host1".into()),
            status: Some(status.into()),
            scheduled: false,
            origin_node_id: origin.map(str::to_string),
            created_at: when,
        }
    }

    fn key() -> StatusKey {
        StatusKey::new("demo", "host1", "refs/heads/master")
    }

    #[test]
    fn test_matching_origin_recorded() {
        let ing = ingestor(Some("node-1"));
        assert_eq!(
            ing.on_event(event(Some("node-1"), "succeeded", 1000)),
            IngestOutcome::Recorded
        );
        assert_eq!(
            ing.cache.get_if_present(&key()),
            Some(StatusValue::new(ReplicationResult::Succeeded, 1000))
        );
    }

    #[test]
    fn test_foreign_origin_discarded() {
        let ing = ingestor(Some("node-1"));
        assert_eq!(
            ing.on_event(event(Some("node-2"), "succeeded", 1000)),
            IngestOutcome::Foreign
        );
        assert!(ing.cache.is_empty());
    }

    #[test]
    fn test_both_unset_recorded() {
        let ing = ingestor(None);
        assert_eq!(ing.on_event(event(None, "succeeded", 1)), IngestOutcome::Recorded);
    }

    #[test]
    fn test_event_origin_without_local_id_discarded() {
        let ing = ingestor(None);
        assert_eq!(
            ing.on_event(event(Some("node-2"), "succeeded", 1)),
            IngestOutcome::Foreign
        );
    }

    #[test]
    fn test_missing_origin_with_local_id_discarded() {
        let ing = ingestor(Some("node-1"));
        assert_eq!(ing.on_event(event(None, "succeeded", 1)), IngestOutcome::Foreign);
    }

    #[test]
    fn test_empty_strings_mean_unset() {
        let ing = ingestor(Some(""));
        assert!(ing.instance_id().is_none());
        assert_eq!(ing.on_event(event(Some(""), "succeeded", 1)), IngestOutcome::Recorded);
    }

    #[test]
    fn test_overwrite_not_merge() {
        let ing = ingestor(Some("node-1"));
        ing.on_event(event(Some("node-1"), "failed", 2000));
        ing.on_event(event(Some("node-1"), "succeeded", 1000));
        assert_eq!(
            ing.cache.get_if_present(&key()),
            Some(StatusValue::new(ReplicationResult::Succeeded, 1000))
        );
    }

    #[test]
    fn test_unrecognized_event_ignored() {
        let ing = ingestor(None);
        let mut e = event(None, "succeeded", 1);
        e.event_type = Some("ref-replication-done".into());
        assert_eq!(ing.on_event(e), IngestOutcome::Ignored);
        assert!(ing.cache.is_empty());
    }

    #[test]
    fn test_metrics_updated() {
        let ing = ingestor(None);
        ing.on_event(event(None, "succeeded", 500));
        ing.on_event(event(None, "bogus", 600));
        ing.on_event(event(Some("other"), "succeeded", 700));

        assert_eq!(ing.metrics.event_counts(), (3, 2, 1, 0));
        assert_eq!(ing.metrics.latest_replication_time("demo"), Some(500));
    }
}
