//! Replication lifecycle events.
//!
//! The replication worker emits loosely typed records. They are decoded once,
//! at ingestion, into [`ReplicationEvent`], whose [`EventKind`] covers the finite
//! set of events that affect replication status.

use crate::status::{ReplicationResult, StatusKey, StatusValue};
use serde::{Deserialize, Serialize};

/// Event type emitted when a push is queued.
pub const REF_REPLICATION_SCHEDULED: &str = "ref-replication-scheduled";
/// Event type emitted when a push of one ref to one destination finished.
pub const REF_REPLICATED: &str = "ref-replicated";
/// Event type emitted when a fetch is queued.
pub const FETCH_REF_REPLICATION_SCHEDULED: &str = "fetch-ref-replication-scheduled";
/// Event type emitted when a fetch of one ref from one source finished.
pub const FETCH_REF_REPLICATED: &str = "fetch-ref-replicated";

/// An event as delivered by the replication worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Event type; when absent the shape is inferred from `scheduled`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Project name.
    #[serde(default)]
    pub project: Option<String>,
    /// Ref name.
    #[serde(rename = "ref", default)]
    pub ref_name: Option<String>,
    /// Resolved destination identifier.
    #[serde(default, alias = "targetNode")]
    pub destination: Option<String>,
    /// Free-form result token.
    #[serde(default)]
    pub status: Option<String>,
    /// True if this event only announces a scheduled replication.
    #[serde(default)]
    pub scheduled: bool,
    /// Node that generated the event.
    #[serde(default, alias = "instanceId")]
    pub origin_node_id: Option<String>,
    /// Event creation time, epoch milliseconds.
    #[serde(default, alias = "eventCreatedOn")]
    pub created_at: i64,
}

/// Project, ref and destination an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    /// Project name.
    pub project: String,
    /// Ref name.
    pub ref_name: String,
    /// Resolved destination identifier.
    pub destination: String,
}

/// The recognized event shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Replication was queued; no terminal result yet.
    Scheduled(RefTarget),
    /// Push to a destination completed.
    PushCompleted {
        /// What was pushed where.
        target: RefTarget,
        /// Parsed result token.
        result: ReplicationResult,
    },
    /// Fetch from a source completed.
    FetchCompleted {
        /// What was fetched from where.
        target: RefTarget,
        /// Parsed result token.
        result: ReplicationResult,
    },
}

impl EventKind {
    /// The ref/destination this event is about.
    pub fn target(&self) -> &RefTarget {
        match self {
            Self::Scheduled(target) => target,
            Self::PushCompleted { target, .. } | Self::FetchCompleted { target, .. } => target,
        }
    }

    /// Result to record for this event.
    pub fn result(&self) -> ReplicationResult {
        match self {
            Self::Scheduled(_) => ReplicationResult::Scheduled,
            Self::PushCompleted { result, .. } | Self::FetchCompleted { result, .. } => *result,
        }
    }
}

/// A classified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEvent {
    /// Node that generated the event, if it said.
    pub origin_node_id: Option<String>,
    /// Event creation time, epoch milliseconds.
    pub created_at: i64,
    /// What happened.
    pub kind: EventKind,
}

impl ReplicationEvent {
    /// Classify a raw record. Returns `None` for shapes that carry no status.
    pub fn classify(record: EventRecord) -> Option<Self> {
        let EventRecord {
            event_type,
            project,
            ref_name,
            destination,
            status,
            scheduled,
            origin_node_id,
            created_at,
        } = record;

        let target = RefTarget {
            project: project.filter(|p| !p.is_empty())?,
            ref_name: ref_name.filter(|r| !r.is_empty())?,
            destination: destination.filter(|d| !d.is_empty())?,
        };
        let result = || ReplicationResult::from_token(status.as_deref().unwrap_or_default());

        let kind = match event_type.as_deref() {
            Some(REF_REPLICATION_SCHEDULED) | Some(FETCH_REF_REPLICATION_SCHEDULED) => {
                EventKind::Scheduled(target)
            }
            Some(REF_REPLICATED) => EventKind::PushCompleted {
                target,
                result: result(),
            },
            Some(FETCH_REF_REPLICATED) => EventKind::FetchCompleted {
                target,
                result: result(),
            },
            Some(_) => return None,
            None if scheduled => EventKind::Scheduled(target),
            None if status.is_some() => EventKind::PushCompleted {
                target,
                result: result(),
            },
            None => return None,
        };

        Some(Self {
            origin_node_id: origin_node_id.filter(|id| !id.is_empty()),
            created_at,
            kind,
        })
    }

    /// Derive the cache entry this event writes.
    pub fn to_entry(&self) -> (StatusKey, StatusValue) {
        let target = self.kind.target();
        (
            StatusKey::new(
                target.project.clone(),
                target.destination.clone(),
                target.ref_name.clone(),
            ),
            StatusValue::new(self.kind.result(), self.created_at),
        )
    }
}
