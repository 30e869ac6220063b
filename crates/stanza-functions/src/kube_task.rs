//! `KubeTask`: run a command in a fresh pod

use crate::kube::{PodRunner, TaskPodSpec};
use crate::output::parse_log_and_create_output;
use async_trait::async_trait;
use stanza_core::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Registry name
pub const KUBE_TASK_FUNC_NAME: &str = "KubeTask";
/// Namespace to run in
pub const KUBE_TASK_NAMESPACE_ARG: &str = "namespace";
/// Container image
pub const KUBE_TASK_IMAGE_ARG: &str = "image";
/// Command and arguments
pub const KUBE_TASK_COMMAND_ARG: &str = "command";

const DEFAULT_NAMESPACE: &str = "default";

/// Runs `command` in a task pod and returns the phase outputs it prints
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeTask;

#[async_trait]
impl Function for KubeTask {
    fn name(&self) -> &'static str {
        KUBE_TASK_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[KUBE_TASK_IMAGE_ARG, KUBE_TASK_COMMAND_ARG]
    }

    async fn exec(&self, ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let image: String = arg(args, KUBE_TASK_IMAGE_ARG)?;
        let command: Vec<String> = arg(args, KUBE_TASK_COMMAND_ARG)?;
        let namespace: String = opt_arg(args, KUBE_TASK_NAMESPACE_ARG, DEFAULT_NAMESPACE.to_string())?;

        let runner: Arc<dyn PodRunner> = ctx.service("pod runner")?;
        let spec = TaskPodSpec {
            namespace,
            image,
            command,
            ..TaskPodSpec::default()
        };
        info!(namespace = %spec.namespace, image = %spec.image, "Running task pod");
        let log = runner
            .run_task(ctx, &spec)
            .await
            .map_err(|e| Error::operation("Failed to run task pod", e))?;
        parse_log_and_create_output(&log)
    }
}
