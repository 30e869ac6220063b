//! `CreateCSISnapshot`: snapshot a PVC and wait until it is usable

use crate::kube::{SnapshotRequest, Snapshotter, VolumeSnapshot};
use async_trait::async_trait;
use rand::Rng;
use stanza_core::cancel::{poll_until, race};
use stanza_core::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry name
pub const CREATE_CSI_SNAPSHOT_FUNC_NAME: &str = "CreateCSISnapshot";
/// Name of the new snapshot
pub const CREATE_CSI_SNAPSHOT_NAME_ARG: &str = "name";
/// PVC to capture
pub const CREATE_CSI_SNAPSHOT_PVC_NAME_ARG: &str = "pvc";
/// Namespace of the PVC
pub const CREATE_CSI_SNAPSHOT_NAMESPACE_ARG: &str = "namespace";
/// Volume snapshot class
pub const CREATE_CSI_SNAPSHOT_SNAPSHOT_CLASS_ARG: &str = "snapshotClass";
/// Labels added to the snapshot
pub const CREATE_CSI_SNAPSHOT_LABELS_ARG: &str = "labels";
/// Output: storage size needed to restore
pub const CREATE_CSI_SNAPSHOT_RESTORE_SIZE_ARG: &str = "restoreSize";
/// Output: bound snapshot content
pub const CREATE_CSI_SNAPSHOT_SNAPSHOT_CONTENT_NAME_ARG: &str = "snapshotContent";

/// How long the snapshot may take to become ready
pub const CREATE_CSI_SNAPSHOT_DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Error message when the snapshot is not ready in time
pub const CREATE_CSI_SNAPSHOT_TIMEOUT_MESSAGE: &str = "SnapshotContent not provisioned in given timeout. \
Please check if CSI driver is installed correctly and if it supports VolumeSnapshot feature.";

const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// `<pvc>-snapshot-<len random chars>`
#[must_use]
pub fn default_snapshot_name(pvc: &str, len: usize) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..len)
        .map(|_| char::from(NAME_ALPHABET[rng.random_range(0..NAME_ALPHABET.len())]))
        .collect();
    format!("{pvc}-snapshot-{suffix}")
}

/// Creates a CSI volume snapshot and waits until it is ready to use
#[derive(Debug, Clone, Copy)]
pub struct CreateCsiSnapshot {
    timeout: Duration,
}

impl Default for CreateCsiSnapshot {
    fn default() -> Self {
        Self {
            timeout: CREATE_CSI_SNAPSHOT_DEFAULT_TIMEOUT,
        }
    }
}

impl CreateCsiSnapshot {
    /// Override the readiness bound
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Deletes a created snapshot unless provisioning completed
///
/// [`delete`](Self::delete) cleans up inline on error paths. If the exec
/// future is dropped instead (an outer deadline won the race), the delete is
/// spawned on the current runtime.
struct PendingSnapshot {
    snapshotter: Arc<dyn Snapshotter>,
    name: String,
    namespace: String,
    armed: bool,
}

impl PendingSnapshot {
    fn new(snapshotter: Arc<dyn Snapshotter>, request: &SnapshotRequest) -> Self {
        Self {
            snapshotter,
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn delete(&mut self) {
        if std::mem::replace(&mut self.armed, false) {
            remove(self.snapshotter.as_ref(), &self.name, &self.namespace).await;
        }
    }
}

impl Drop for PendingSnapshot {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(name = %self.name, "No runtime to delete unready snapshot");
            return;
        };
        let snapshotter = Arc::clone(&self.snapshotter);
        let name = std::mem::take(&mut self.name);
        let namespace = std::mem::take(&mut self.namespace);
        runtime.spawn(async move { remove(snapshotter.as_ref(), &name, &namespace).await });
    }
}

async fn remove(snapshotter: &dyn Snapshotter, name: &str, namespace: &str) {
    match snapshotter.delete(name, namespace).await {
        Ok(()) => debug!(%name, %namespace, "Deleted unready snapshot"),
        Err(e) => warn!(%name, error = %e, "Failed to delete unready snapshot"),
    }
}

async fn provision(
    ctx: &ExecContext,
    snapshotter: &dyn Snapshotter,
    request: &SnapshotRequest,
    pending: &mut PendingSnapshot,
) -> Result<VolumeSnapshot> {
    if let Err(e) = snapshotter.create(request).await {
        pending.disarm();
        return Err(Error::operation("Failed to create snapshot", e));
    }

    poll_until(ctx, READY_POLL_INTERVAL, move || async move {
        let snapshot = snapshotter
            .get(&request.name, &request.namespace)
            .await
            .map_err(|e| Error::operation("Failed to get snapshot", e))?;
        Ok(snapshot.ready_to_use)
    })
    .await?;

    snapshotter
        .get(&request.name, &request.namespace)
        .await
        .map_err(|e| Error::operation("Failed to get snapshot", e))
}

#[async_trait]
impl Function for CreateCsiSnapshot {
    fn name(&self) -> &'static str {
        CREATE_CSI_SNAPSHOT_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[
            CREATE_CSI_SNAPSHOT_PVC_NAME_ARG,
            CREATE_CSI_SNAPSHOT_NAMESPACE_ARG,
            CREATE_CSI_SNAPSHOT_SNAPSHOT_CLASS_ARG,
        ]
    }

    async fn exec(&self, ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let pvc: String = arg(args, CREATE_CSI_SNAPSHOT_PVC_NAME_ARG)?;
        let namespace: String = arg(args, CREATE_CSI_SNAPSHOT_NAMESPACE_ARG)?;
        let snapshot_class: String = arg(args, CREATE_CSI_SNAPSHOT_SNAPSHOT_CLASS_ARG)?;
        let name: String = opt_arg(args, CREATE_CSI_SNAPSHOT_NAME_ARG, default_snapshot_name(&pvc, 20))?;
        let labels: BTreeMap<String, String> = opt_arg(args, CREATE_CSI_SNAPSHOT_LABELS_ARG, BTreeMap::new())?;

        let snapshotter: Arc<dyn Snapshotter> = ctx.service("snapshotter")?;
        let request = SnapshotRequest {
            name,
            namespace,
            pvc,
            snapshot_class,
            labels,
        };
        info!(name = %request.name, pvc = %request.pvc, "Creating volume snapshot");

        let mut pending = PendingSnapshot::new(Arc::clone(&snapshotter), &request);
        let bounded = ctx.with_timeout(self.timeout);
        let outcome = match race(
            &bounded,
            provision(&bounded, snapshotter.as_ref(), &request, &mut pending),
        )
        .await
        {
            Ok(result) => result,
            Err(done) => Err(done.into()),
        };
        bounded.cancel();

        let snapshot = match outcome {
            Ok(snapshot) => {
                pending.disarm();
                snapshot
            }
            Err(e) => {
                pending.delete().await;
                if e.is_timeout() {
                    return Err(Error::timeout(
                        CREATE_CSI_SNAPSHOT_FUNC_NAME,
                        CREATE_CSI_SNAPSHOT_TIMEOUT_MESSAGE,
                    ));
                }
                return Err(e);
            }
        };

        Ok(OutputMap::from([
            (CREATE_CSI_SNAPSHOT_NAME_ARG.to_string(), Value::from(request.name)),
            (CREATE_CSI_SNAPSHOT_PVC_NAME_ARG.to_string(), Value::from(request.pvc)),
            (
                CREATE_CSI_SNAPSHOT_NAMESPACE_ARG.to_string(),
                Value::from(request.namespace),
            ),
            (
                CREATE_CSI_SNAPSHOT_RESTORE_SIZE_ARG.to_string(),
                Value::from(snapshot.restore_size.unwrap_or_default()),
            ),
            (
                CREATE_CSI_SNAPSHOT_SNAPSHOT_CONTENT_NAME_ARG.to_string(),
                Value::from(snapshot.content_name.unwrap_or_default()),
            ),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::KubeResult;
    use parking_lot::Mutex;
    use stanza_core::Services;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Becomes ready after `ready_after` reads; never if `None`
    #[derive(Default)]
    struct Fake {
        ready_after: Option<usize>,
        gets: AtomicUsize,
        created: Mutex<Vec<SnapshotRequest>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Snapshotter for Fake {
        async fn create(&self, request: &SnapshotRequest) -> KubeResult<()> {
            self.created.lock().push(request.clone());
            Ok(())
        }

        async fn get(&self, name: &str, namespace: &str) -> KubeResult<VolumeSnapshot> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(VolumeSnapshot {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ready_to_use: self.ready_after.is_some_and(|after| n >= after),
                restore_size: Some("1Gi".to_string()),
                content_name: Some(format!("snapcontent-{name}")),
            })
        }

        async fn delete(&self, name: &str, _namespace: &str) -> KubeResult<()> {
            self.deleted.lock().push(name.to_string());
            Ok(())
        }
    }

    fn setup(fake: Fake) -> (Arc<Fake>, ExecContext) {
        let fake = Arc::new(fake);
        let snapshotter: Arc<dyn Snapshotter> = fake.clone();
        let ctx = ExecContext::with_services(Services::new().with(snapshotter));
        (fake, ctx)
    }

    fn args() -> ArgMap {
        ArgMap::from([
            ("name".to_string(), Value::from("snap-1")),
            ("pvc".to_string(), Value::from("data-mysql-0")),
            ("namespace".to_string(), Value::from("db")),
            ("snapshotClass".to_string(), Value::from("csi-hostpath")),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_ready() {
        let (fake, ctx) = setup(Fake {
            ready_after: Some(3),
            ..Fake::default()
        });

        let out = CreateCsiSnapshot::default()
            .exec(&ctx, &TemplateParams::new(), &args())
            .await
            .unwrap();

        assert_eq!(out["name"], Value::from("snap-1"));
        assert_eq!(out["restoreSize"], Value::from("1Gi"));
        assert_eq!(out["snapshotContent"], Value::from("snapcontent-snap-1"));
        assert_eq!(fake.created.lock()[0].snapshot_class, "csi-hostpath");
        assert!(fake.deleted.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unready_snapshot_times_out_and_is_deleted() {
        let (fake, ctx) = setup(Fake::default());

        let err = CreateCsiSnapshot::default()
            .with_timeout(Duration::from_secs(5))
            .exec(&ctx, &TemplateParams::new(), &args())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains(CREATE_CSI_SNAPSHOT_TIMEOUT_MESSAGE));
        assert_eq!(*fake.deleted.lock(), vec!["snap-1".to_string()]);
        assert!(ctx.err().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_creation_is_deleted() {
        let (fake, ctx) = setup(Fake::default());
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let err = CreateCsiSnapshot::default()
            .exec(&ctx, &TemplateParams::new(), &args())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(*fake.deleted.lock(), vec!["snap-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_creation_is_deleted() {
        let (fake, ctx) = setup(Fake::default());
        let function = CreateCsiSnapshot::default();
        let (params, args) = (TemplateParams::new(), args());

        let outer = tokio::time::timeout(Duration::from_secs(3), function.exec(&ctx, &params, &args)).await;
        assert!(outer.is_err());
        assert_eq!(fake.created.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*fake.deleted.lock(), vec!["snap-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_snapshot_is_kept() {
        let (fake, ctx) = setup(Fake {
            ready_after: Some(1),
            ..Fake::default()
        });

        CreateCsiSnapshot::default()
            .exec(&ctx, &TemplateParams::new(), &args())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fake.deleted.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generates_name_when_absent() {
        let (fake, ctx) = setup(Fake {
            ready_after: Some(1),
            ..Fake::default()
        });
        let mut args = args();
        args.remove("name");

        let out = CreateCsiSnapshot::default()
            .exec(&ctx, &TemplateParams::new(), &args)
            .await
            .unwrap();

        let name = out["name"].as_str().unwrap();
        assert!(name.starts_with("data-mysql-0-snapshot-"));
        assert_eq!(fake.created.lock()[0].name, name);
    }

    #[tokio::test]
    async fn missing_snapshotter_is_reported() {
        let err = CreateCsiSnapshot::default()
            .exec(&ExecContext::new(), &TemplateParams::new(), &args())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("snapshotter"));
    }

    #[test]
    fn default_name_shape() {
        let name = default_snapshot_name("mysql-pvc", 20);
        let suffix = name.strip_prefix("mysql-pvc-snapshot-").unwrap();
        assert_eq!(suffix.len(), 20);
        assert!(suffix.bytes().all(|b| NAME_ALPHABET.contains(&b)));
        assert_ne!(name, default_snapshot_name("mysql-pvc", 20));
    }
}
