//! `PrepareData`: run a command with PVCs mounted

use crate::kube::{PodRunner, TaskPodSpec};
use crate::output::parse_log_and_create_output;
use async_trait::async_trait;
use stanza_core::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Registry name
pub const PREPARE_DATA_FUNC_NAME: &str = "PrepareData";
/// Namespace of the PVCs
pub const PREPARE_DATA_NAMESPACE_ARG: &str = "namespace";
/// Container image
pub const PREPARE_DATA_IMAGE_ARG: &str = "image";
/// Command and arguments
pub const PREPARE_DATA_COMMAND_ARG: &str = "command";
/// PVC name → mount path
pub const PREPARE_DATA_VOLUMES_ARG: &str = "volumes";
/// Service account for the pod
pub const PREPARE_DATA_SERVICE_ACCOUNT_ARG: &str = "serviceaccount";

/// Runs `command` in a task pod with the given volumes mounted
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareData;

#[async_trait]
impl Function for PrepareData {
    fn name(&self) -> &'static str {
        PREPARE_DATA_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[
            PREPARE_DATA_NAMESPACE_ARG,
            PREPARE_DATA_IMAGE_ARG,
            PREPARE_DATA_COMMAND_ARG,
        ]
    }

    async fn exec(&self, ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let namespace: String = arg(args, PREPARE_DATA_NAMESPACE_ARG)?;
        let image: String = arg(args, PREPARE_DATA_IMAGE_ARG)?;
        let command: Vec<String> = arg(args, PREPARE_DATA_COMMAND_ARG)?;
        let volumes: BTreeMap<String, String> = opt_arg(args, PREPARE_DATA_VOLUMES_ARG, BTreeMap::new())?;
        let service_account: Option<String> = opt_arg(args, PREPARE_DATA_SERVICE_ACCOUNT_ARG, None)?;

        let runner: Arc<dyn PodRunner> = ctx.service("pod runner")?;
        let spec = TaskPodSpec {
            namespace,
            image,
            command,
            volumes,
            service_account,
        };
        info!(namespace = %spec.namespace, volumes = spec.volumes.len(), "Preparing data");
        let log = runner
            .run_task(ctx, &spec)
            .await
            .map_err(|e| Error::operation("Failed to prepare data", e))?;
        parse_log_and_create_output(&log)
    }
}
