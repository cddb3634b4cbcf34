//! Project-level status queries.
//!
//! A query resolves the selected remotes to destinations, asks the repository
//! for the project's refs, and looks every (ref, destination) pair up in the
//! cache. Absent entries are left out; they mean "nothing observed yet".

use crate::cache::StatusCache;
use crate::error::StatusError;
use crate::remote::{RemoteRegistry, RemoteSelector};
use crate::status::{ProjectStatus, RefStatus, StatusKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Source of the refs that currently exist in a project.
pub trait RefLister: Send + Sync {
    /// All ref names of `project`, or [`StatusError::ProjectNotFound`].
    fn list_refs(&self, project: &str) -> Result<BTreeSet<String>, StatusError>;
}

/// Decides who may read a project's replication status.
pub trait AccessPolicy: Send + Sync {
    /// True if `principal` administers the server or owns `project`.
    fn is_project_owner_or_admin(&self, principal: &str, project: &str) -> bool;
}

/// Answers status queries from the cache.
#[derive(Debug, Clone)]
pub struct StatusQuery {
    remotes: Arc<RemoteRegistry>,
    cache: Arc<StatusCache>,
}

impl StatusQuery {
    /// Create a query engine over `remotes` and `cache`.
    pub fn new(remotes: Arc<RemoteRegistry>, cache: Arc<StatusCache>) -> Self {
        Self { remotes, cache }
    }

    /// Remote registry in use.
    pub fn remotes(&self) -> &RemoteRegistry {
        &self.remotes
    }

    /// Build the status view of `project` for the selected remotes.
    ///
    /// Not a snapshot: writes racing with the query may or may not be seen.
    pub fn query(
        &self,
        project: &str,
        selector: &RemoteSelector,
        refs: &dyn RefLister,
    ) -> Result<ProjectStatus, StatusError> {
        let destinations = self.remotes.resolve_selector(selector, project);
        if destinations.is_empty() {
            return Ok(ProjectStatus::empty(project));
        }

        let ref_names = refs.list_refs(project)?;
        let mut ref_status: BTreeMap<String, RefStatus> = BTreeMap::new();

        for ref_name in &ref_names {
            for destination in &destinations {
                let key = StatusKey::new(project, destination.as_str(), ref_name.as_str());
                if let Some(value) = self.cache.get_if_present(&key) {
                    ref_status
                        .entry(ref_name.clone())
                        .or_default()
                        .remote_status
                        .insert(destination.clone(), value);
                }
            }
        }

        Ok(ProjectStatus::new(project, ref_status))
    }

    /// Same as [`StatusQuery::query`], after checking that `principal` may
    /// read the project.
    pub fn query_as(
        &self,
        principal: &str,
        access: &dyn AccessPolicy,
        project: &str,
        selector: &RemoteSelector,
        refs: &dyn RefLister,
    ) -> Result<ProjectStatus, StatusError> {
        if !access.is_project_owner_or_admin(principal, project) {
            tracing::debug!(principal, project, "replication status access denied");
            return Err(StatusError::Forbidden);
        }
        self.query(project, selector, refs)
    }
}
