//! Testing utilities for the Stanza workspace
//!
//! In-memory collaborators, blueprint builders and a ready-made services map.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use stanza_core::{Action, Blueprint, BoxError, ExecContext, Phase, Services};
use stanza_functions::{KubeResult, PodRunner, SnapshotRequest, Snapshotter, TaskPodSpec, VolumeSnapshot};
use stanza_repo::{ClientOptions, LocalRepository, Repository};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Records every pod it is asked to run and answers with a canned log
#[derive(Debug, Default)]
pub struct FakePodRunner {
    log: String,
    fail_with: Option<String>,
    tasks: Mutex<Vec<TaskPodSpec>>,
    execs: Mutex<Vec<(String, String, Option<String>, Vec<String>)>>,
}

impl FakePodRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> Vec<TaskPodSpec> {
        self.tasks.lock().clone()
    }

    /// `(namespace, pod, container, command)` per exec
    pub fn execs(&self) -> Vec<(String, String, Option<String>, Vec<String>)> {
        self.execs.lock().clone()
    }

    fn answer(&self) -> KubeResult<String> {
        match &self.fail_with {
            Some(message) => Err(BoxError::from(message.clone())),
            None => Ok(self.log.clone()),
        }
    }
}

#[async_trait]
impl PodRunner for FakePodRunner {
    async fn run_task(&self, _ctx: &ExecContext, spec: &TaskPodSpec) -> KubeResult<String> {
        self.tasks.lock().push(spec.clone());
        self.answer()
    }

    async fn exec(
        &self,
        _ctx: &ExecContext,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> KubeResult<String> {
        self.execs.lock().push((
            namespace.to_string(),
            pod.to_string(),
            container.map(str::to_string),
            command.to_vec(),
        ));
        self.answer()
    }
}

/// Volume snapshots that become ready after a number of reads
#[derive(Debug, Default)]
pub struct FakeSnapshotter {
    ready_after: Option<usize>,
    snapshots: Mutex<BTreeMap<(String, String), (SnapshotRequest, usize)>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeSnapshotter {
    /// Ready on the `reads`-th read
    pub fn ready_after(reads: usize) -> Self {
        Self {
            ready_after: Some(reads),
            ..Self::default()
        }
    }

    pub fn never_ready() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<SnapshotRequest> {
        self.snapshots.lock().values().map(|(r, _)| r.clone()).collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl Snapshotter for FakeSnapshotter {
    async fn create(&self, request: &SnapshotRequest) -> KubeResult<()> {
        self.snapshots
            .lock()
            .insert((request.namespace.clone(), request.name.clone()), (request.clone(), 0));
        Ok(())
    }

    async fn get(&self, name: &str, namespace: &str) -> KubeResult<VolumeSnapshot> {
        let mut snapshots = self.snapshots.lock();
        let (request, reads) = snapshots
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| BoxError::from(format!("volumesnapshot {namespace}/{name} not found")))?;
        *reads += 1;
        Ok(VolumeSnapshot {
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            ready_to_use: self.ready_after.is_some_and(|after| *reads >= after),
            restore_size: Some("1Gi".to_string()),
            content_name: Some(format!("snapcontent-{}", request.name)),
        })
    }

    async fn delete(&self, name: &str, namespace: &str) -> KubeResult<()> {
        self.snapshots
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
        self.deleted.lock().push(name.to_string());
        Ok(())
    }
}

/// In-memory repository for client `stanza@test-host`
pub fn memory_repository() -> Arc<LocalRepository> {
    Arc::new(LocalRepository::in_memory(ClientOptions::new("stanza", "test-host")))
}

/// Services map with whichever collaborators are given
#[derive(Default)]
pub struct TestServices {
    services: Services,
}

impl TestServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pod_runner(mut self, runner: Arc<FakePodRunner>) -> Self {
        let runner: Arc<dyn PodRunner> = runner;
        self.services.insert(runner);
        self
    }

    pub fn snapshotter(mut self, snapshotter: Arc<FakeSnapshotter>) -> Self {
        let snapshotter: Arc<dyn Snapshotter> = snapshotter;
        self.services.insert(snapshotter);
        self
    }

    pub fn repository(mut self, repo: Arc<LocalRepository>) -> Self {
        let repo: Arc<dyn Repository> = repo;
        self.services.insert(repo);
        self
    }

    pub fn build(self) -> Services {
        self.services
    }
}

/// Phase with the given arguments
pub fn phase(name: &str, func: &str, args: &[(&str, Value)]) -> Phase {
    args.iter()
        .fold(Phase::new(name, func), |phase, (key, value)| phase.with_arg(*key, value.clone()))
}

/// Blueprint with a single action
pub fn blueprint(action: &str, phases: Vec<Phase>) -> Blueprint {
    Blueprint::new().with_action(action, Action::new(phases))
}

/// `["sh", "-c", script]`
pub fn shell(script: &str) -> Value {
    Value::from(vec!["sh", "-c", script])
}
