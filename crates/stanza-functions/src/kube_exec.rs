//! `KubeExec`: run a command in an existing pod

use crate::kube::PodRunner;
use crate::output::parse_log_and_create_output;
use async_trait::async_trait;
use stanza_core::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Registry name
pub const KUBE_EXEC_FUNC_NAME: &str = "KubeExec";
/// Namespace of the pod
pub const KUBE_EXEC_NAMESPACE_ARG: &str = "namespace";
/// Pod name
pub const KUBE_EXEC_POD_ARG: &str = "pod";
/// Container name, defaults to the pod's first container
pub const KUBE_EXEC_CONTAINER_ARG: &str = "container";
/// Command and arguments
pub const KUBE_EXEC_COMMAND_ARG: &str = "command";

/// Runs `command` inside a running pod
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeExec;

#[async_trait]
impl Function for KubeExec {
    fn name(&self) -> &'static str {
        KUBE_EXEC_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[KUBE_EXEC_NAMESPACE_ARG, KUBE_EXEC_POD_ARG, KUBE_EXEC_COMMAND_ARG]
    }

    async fn exec(&self, ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let namespace: String = arg(args, KUBE_EXEC_NAMESPACE_ARG)?;
        let pod: String = arg(args, KUBE_EXEC_POD_ARG)?;
        let command: Vec<String> = arg(args, KUBE_EXEC_COMMAND_ARG)?;
        let container: Option<String> = opt_arg(args, KUBE_EXEC_CONTAINER_ARG, None)?;

        let runner: Arc<dyn PodRunner> = ctx.service("pod runner")?;
        info!(%namespace, %pod, "Executing in pod");
        let stdout = runner
            .exec(ctx, &namespace, &pod, container.as_deref(), &command)
            .await
            .map_err(|e| Error::operation(format!("Failed to exec command in pod {pod}"), e))?;
        parse_log_and_create_output(&stdout)
    }
}
