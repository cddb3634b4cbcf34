//! Status key/value model and the per-project roll-up returned by queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of the most recent replication attempt for one ref on one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationResult {
    /// Replication was not attempted (e.g. nothing to push).
    NotAttempted,
    /// Replication is queued but has not completed.
    Scheduled,
    /// Replication completed successfully.
    Succeeded,
    /// Replication failed.
    Failed,
    /// The status token could not be classified.
    Unknown,
}

impl ReplicationResult {
    /// Parse a free-form status token, case-insensitively.
    ///
    /// Unrecognized tokens become [`ReplicationResult::Unknown`] and are logged.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "not_attempted" => Self::NotAttempted,
            "scheduled" => Self::Scheduled,
            "failed" => Self::Failed,
            _ => {
                tracing::error!(
                    token,
                    "could not parse result into a valid replication status"
                );
                Self::Unknown
            }
        }
    }

    /// Canonical upper-case name, as written to the wire format.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotAttempted => "NOT_ATTEMPTED",
            Self::Scheduled => "SCHEDULED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Strict inverse of [`ReplicationResult::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NOT_ATTEMPTED" => Some(Self::NotAttempted),
            "SCHEDULED" => Some(Self::Scheduled),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// True for `FAILED` and `UNKNOWN`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Unknown)
    }
}

impl fmt::Display for ReplicationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary key of the status cache.
///
/// `destination` is always a resolved identifier (`host[:port]` or a local
/// path), never a URL template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusKey {
    project: String,
    destination: String,
    ref_name: String,
}

impl StatusKey {
    /// Create a new key.
    pub fn new(
        project: impl Into<String>,
        destination: impl Into<String>,
        ref_name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            destination: destination.into(),
            ref_name: ref_name.into(),
        }
    }

    /// Project name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Resolved destination identifier.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Full ref name (e.g. `refs/heads/master`).
    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }
}

/// Latest observed result for a key, with the event creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusValue {
    /// Replication result.
    pub status: ReplicationResult,
    /// Event creation time, epoch milliseconds.
    pub when: i64,
}

impl StatusValue {
    /// Create a new value.
    pub fn new(status: ReplicationResult, when: i64) -> Self {
        Self { status, when }
    }

    /// Whether this value counts as a failure when rolling up.
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// Statuses of one ref across destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefStatus {
    /// Destination identifier to latest value.
    pub remote_status: BTreeMap<String, StatusValue>,
}

impl RefStatus {
    /// True if any destination reports a failure.
    pub fn has_failures(&self) -> bool {
        self.remote_status.values().any(StatusValue::is_failure)
    }
}

/// Project-level roll-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    /// No failure observed.
    Ok,
    /// At least one failure observed.
    Failed,
}

impl OverallStatus {
    /// True for [`OverallStatus::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Status view of one project, built on demand from the cache.
///
/// Serialized as `{"refStatus": {ref: {"remoteStatus": {dest: {"status", "when"}}}}, "status", "project"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    /// Ref name to per-destination statuses.
    pub ref_status: BTreeMap<String, RefStatus>,
    /// Overall roll-up.
    pub status: OverallStatus,
    /// Project name.
    pub project: String,
}

impl ProjectStatus {
    /// Build a view and compute its overall status.
    pub fn new(project: impl Into<String>, ref_status: BTreeMap<String, RefStatus>) -> Self {
        let status = if ref_status.values().any(RefStatus::has_failures) {
            OverallStatus::Failed
        } else {
            OverallStatus::Ok
        };
        Self {
            ref_status,
            status,
            project: project.into(),
        }
    }

    /// Empty view: nothing observed, so nothing failed.
    pub fn empty(project: impl Into<String>) -> Self {
        Self::new(project, BTreeMap::new())
    }

    /// Look up a single (ref, destination) value.
    pub fn get(&self, ref_name: &str, destination: &str) -> Option<&StatusValue> {
        self.ref_status
            .get(ref_name)
            .and_then(|r| r.remote_status.get(destination))
    }

    /// Total number of (ref, destination) values in the view.
    pub fn value_count(&self) -> usize {
        self.ref_status.values().map(|r| r.remote_status.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_token_case_insensitive() {
        assert_eq!(
            ReplicationResult::from_token("SUCCEEDED"),
            ReplicationResult::Succeeded
        );
        assert_eq!(
            ReplicationResult::from_token("Failed"),
            ReplicationResult::Failed
        );
        assert_eq!(
            ReplicationResult::from_token("not_attempted"),
            ReplicationResult::NotAttempted
        );
        assert_eq!(
            ReplicationResult::from_token("scheduled"),
            ReplicationResult::Scheduled
        );
    }

    #[test]
    fn test_from_token_unknown() {
        assert_eq!(
            ReplicationResult::from_token("rejected_nonfastforward"),
            ReplicationResult::Unknown
        );
        assert_eq!(ReplicationResult::from_token(""), ReplicationResult::Unknown);
    }

    #[test]
    fn test_is_failure() {
        assert!(ReplicationResult::Failed.is_failure());
        assert!(ReplicationResult::Unknown.is_failure());
        assert!(!ReplicationResult::Succeeded.is_failure());
        assert!(!ReplicationResult::Scheduled.is_failure());
        assert!(!ReplicationResult::NotAttempted.is_failure());
    }

    #[test]
    fn test_name_round_trip() {
        for r in [
            ReplicationResult::NotAttempted,
            ReplicationResult::Scheduled,
            ReplicationResult::Succeeded,
            ReplicationResult::Failed,
            ReplicationResult::Unknown,
        ] {
            assert_eq!(ReplicationResult::from_name(r.name()), Some(r));
        }
        assert_eq!(ReplicationResult::from_name("succeeded"), None);
    }

    #[test]
    fn test_key_structural_equality() {
        let a = StatusKey::new("demo", "host1", "refs/heads/master");
        let b = StatusKey::new("demo".to_string(), "host1", "refs/heads/master");
        let c = StatusKey::new("demo", "host2", "refs/heads/master");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.project(), "demo");
        assert_eq!(a.destination(), "host1");
        assert_eq!(a.ref_name(), "refs/heads/master");
    }

    #[test]
    fn test_project_status_overall() {
        let mut ok = RefStatus::default();
        ok.remote_status
            .insert("host1".into(), StatusValue::new(ReplicationResult::Succeeded, 1));
        let mut bad = RefStatus::default();
        bad.remote_status
            .insert("host2".into(), StatusValue::new(ReplicationResult::Unknown, 2));

        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/a".to_string(), ok.clone());
        assert_eq!(ProjectStatus::new("p", refs.clone()).status, OverallStatus::Ok);

        refs.insert("refs/heads/b".to_string(), bad);
        let status = ProjectStatus::new("p", refs);
        assert_eq!(status.status, OverallStatus::Failed);
        assert_eq!(status.value_count(), 2);
    }

    #[test]
    fn test_empty_project_status_is_ok() {
        let status = ProjectStatus::empty("p");
        assert_eq!(status.status, OverallStatus::Ok);
        assert!(status.ref_status.is_empty());
    }

    #[test]
    fn test_project_status_json_shape() {
        let mut ref_status = RefStatus::default();
        ref_status.remote_status.insert(
            "host1".into(),
            StatusValue::new(ReplicationResult::Succeeded, 1000),
        );
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/master".to_string(), ref_status);
        let status = ProjectStatus::new("demo", refs);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "refStatus": {
                    "refs/heads/master": {
                        "remoteStatus": {
                            "host1": {"status": "SUCCEEDED", "when": 1000}
                        }
                    }
                },
                "status": "OK",
                "project": "demo"
            })
        );
    }
}
