//! Stanza Functions - built-in blueprint functions
//!
//! | Name                     | Purpose                                    |
//! |--------------------------|--------------------------------------------|
//! | `KubeTask`               | run a command in a fresh pod               |
//! | `KubeExec`               | run a command in an existing pod           |
//! | `PrepareData`            | run a command with PVCs mounted            |
//! | `CreateCSISnapshot`      | snapshot a PVC and wait until it is ready  |
//! | `CreateContentSnapshot`  | store data or a directory in the repository|
//! | `RestoreContentSnapshot` | stream stored content back to a file       |
//!
//! Cluster access goes through the [`PodRunner`] and [`Snapshotter`]
//! collaborators; content snapshots use the `Arc<dyn Repository>` found in
//! the phase context's services.

#![warn(unreachable_pub)]

pub mod content_snapshot;
pub mod create_csi_snapshot;
pub mod kube;
pub mod kube_exec;
pub mod kube_task;
pub mod output;
pub mod prepare_data;

pub use content_snapshot::{CreateContentSnapshot, RestoreContentSnapshot};
pub use create_csi_snapshot::{
    default_snapshot_name, CreateCsiSnapshot, CREATE_CSI_SNAPSHOT_DEFAULT_TIMEOUT, CREATE_CSI_SNAPSHOT_TIMEOUT_MESSAGE,
};
pub use kube::{KubeResult, PodRunner, SnapshotRequest, Snapshotter, TaskPodSpec, VolumeSnapshot};
pub use kube_exec::KubeExec;
pub use kube_task::KubeTask;
pub use output::{parse_log_and_create_output, phase_output_line, PHASE_OUTPUT_MARKER};
pub use prepare_data::PrepareData;

use stanza_core::{registry, Function, FunctionRegistry, Result};
use std::sync::Arc;

/// One instance of every built-in function
#[must_use]
pub fn builtins() -> Vec<Arc<dyn Function>> {
    vec![
        Arc::new(KubeTask),
        Arc::new(KubeExec),
        Arc::new(PrepareData),
        Arc::new(CreateCsiSnapshot::default()),
        Arc::new(CreateContentSnapshot),
        Arc::new(RestoreContentSnapshot),
    ]
}

/// Register every built-in function
///
/// # Errors
/// [`stanza_core::Error::DuplicateFunction`] if a built-in name is taken
pub fn register_builtins(registry: &mut FunctionRegistry) -> Result<()> {
    for function in builtins() {
        registry.register_arc(function)?;
    }
    Ok(())
}

/// Fresh registry holding the built-ins
///
/// # Errors
/// See [`register_builtins`]
pub fn default_registry() -> Result<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

/// Install the built-ins as the process-wide registry
///
/// Safe to call more than once; later calls return the installed registry.
///
/// # Errors
/// See [`register_builtins`]
pub fn init() -> Result<&'static FunctionRegistry> {
    registry::get_or_install(default_registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_have_unique_names() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), builtins().len());
        for name in [
            "KubeTask",
            "KubeExec",
            "PrepareData",
            "CreateCSISnapshot",
            "CreateContentSnapshot",
            "RestoreContentSnapshot",
        ] {
            assert!(registry.contains(name), "{name} not registered");
        }
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = default_registry().unwrap();
        let err = register_builtins(&mut registry).unwrap_err();
        assert_eq!(err.to_string(), "Function {KubeTask} has already been registered");
    }

    #[test]
    fn init_is_idempotent() {
        let first = init().unwrap();
        let second = init().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.contains("KubeExec"));
    }
}
