//! The function capability
//!
//! Every operation a phase can invoke implements [`Function`]. Functions are
//! registered by name in a [`FunctionRegistry`](crate::FunctionRegistry) and
//! dispatched by the engine; adding an operation never requires touching the
//! registry or the validator.

use crate::cancel::ExecContext;
use crate::error::Result;
use crate::value::{ArgMap, OutputMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Option key overriding the host name recorded for snapshots
pub const HOST_NAME_OPTION: &str = "hostName";

/// Option key overriding the user name recorded for snapshots
pub const USER_NAME_OPTION: &str = "userName";

/// A registered, named operation
#[async_trait::async_trait]
pub trait Function: Send + Sync {
    /// Registry key of this function
    fn name(&self) -> &'static str;

    /// Keys that must be present in every phase invoking this function
    ///
    /// Checked during pre-flight validation, in this order. Requirements that
    /// depend on combinations of optional arguments are checked in
    /// [`exec`](Function::exec) instead.
    fn required_args(&self) -> &'static [&'static str];

    /// Execute the function
    ///
    /// # Arguments
    /// * `ctx` - Cancellable context for this phase; long-running work must
    ///   observe it
    /// * `params` - Run options and outputs of earlier phases
    /// * `args` - This phase's argument bag
    async fn exec(&self, ctx: &ExecContext, params: &TemplateParams, args: &ArgMap)
        -> Result<OutputMap>;
}

/// Outputs of completed phases, keyed by phase name
pub type PhaseOutputs = BTreeMap<String, OutputMap>;

/// Parameter context visible to each phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Run-wide options supplied by the caller
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Outputs of phases that already completed
    #[serde(default)]
    pub phases: PhaseOutputs,
}

impl TemplateParams {
    /// Create empty parameters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a run option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Get a run option
    #[inline]
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Get an output value of an earlier phase
    #[must_use]
    pub fn output(&self, phase: &str, key: &str) -> Option<&Value> {
        self.phases.get(phase).and_then(|o| o.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_and_outputs() {
        let mut params = TemplateParams::new().with_option(HOST_NAME_OPTION, "node-1");
        params
            .phases
            .insert("snap".into(), OutputMap::from([("snapshotID".into(), json!("k1"))]));

        assert_eq!(params.option(HOST_NAME_OPTION), Some("node-1"));
        assert_eq!(params.option(USER_NAME_OPTION), None);
        assert_eq!(params.output("snap", "snapshotID"), Some(&json!("k1")));
        assert_eq!(params.output("snap", "missing"), None);
    }
}
