#![warn(missing_docs)]

//! Replication status tracking: records the latest replication outcome per
//! project, destination and ref, and rolls it up into a per-project view.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod journal;
pub mod metrics;
pub mod query;
pub mod remote;
pub mod status;

pub use cache::{CacheStats, StatusCache};
pub use config::{CacheConfig, StatusConfig};
pub use error::{CodecError, StatusError};
pub use event::{EventKind, EventRecord, ReplicationEvent};
pub use ingest::{EventIngestor, IngestOutcome};
pub use journal::FileJournal;
pub use metrics::StatusMetrics;
pub use query::{AccessPolicy, RefLister, StatusQuery};
pub use remote::{NamingStyle, RemoteDestinationConfig, RemoteRegistry, RemoteSelector};
pub use status::{OverallStatus, ProjectStatus, RefStatus, ReplicationResult, StatusKey, StatusValue};
