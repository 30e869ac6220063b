//! Cluster collaborators
//!
//! Functions never talk to a cluster directly. They look up a [`PodRunner`]
//! or a [`Snapshotter`] in the phase context's services:
//!
//! ```rust,ignore
//! let services = Services::new()
//!     .with::<Arc<dyn PodRunner>>(Arc::new(runner))
//!     .with::<Arc<dyn Snapshotter>>(Arc::new(snapshotter));
//! ```

use async_trait::async_trait;
use stanza_core::{BoxError, ExecContext};
use std::collections::BTreeMap;

/// Result of a collaborator call
pub type KubeResult<T> = Result<T, BoxError>;

/// One-shot pod running a command to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPodSpec {
    /// Namespace to run in
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Command and arguments
    pub command: Vec<String>,
    /// PVC name → mount path
    pub volumes: BTreeMap<String, String>,
    /// Service account, if not the namespace default
    pub service_account: Option<String>,
}

/// Runs commands in pods
#[async_trait]
pub trait PodRunner: Send + Sync {
    /// Run a task pod to completion and return its log
    async fn run_task(&self, ctx: &ExecContext, spec: &TaskPodSpec) -> KubeResult<String>;

    /// Run a command in an existing pod and return its stdout
    async fn exec(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> KubeResult<String>;
}

/// Request for a new volume snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Snapshot name
    pub name: String,
    /// Namespace of the PVC
    pub namespace: String,
    /// PVC to capture
    pub pvc: String,
    /// Volume snapshot class
    pub snapshot_class: String,
    /// Labels added to the snapshot
    pub labels: BTreeMap<String, String>,
}

/// Observed state of a volume snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSnapshot {
    /// Snapshot name
    pub name: String,
    /// Snapshot namespace
    pub namespace: String,
    /// Whether the snapshot can be restored from
    pub ready_to_use: bool,
    /// Storage size needed to restore
    pub restore_size: Option<String>,
    /// Bound snapshot content
    pub content_name: Option<String>,
}

/// Manages volume snapshots
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Create a snapshot of a PVC
    async fn create(&self, request: &SnapshotRequest) -> KubeResult<()>;

    /// Read a snapshot's current state
    async fn get(&self, name: &str, namespace: &str) -> KubeResult<VolumeSnapshot>;

    /// Delete a snapshot
    async fn delete(&self, name: &str, namespace: &str) -> KubeResult<()>;
}
