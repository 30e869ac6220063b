//! Execution engine
//!
//! Runs the phases of an action strictly in order. Each phase gets its own
//! child context, bounded by the configured per-phase timeout, so one phase's
//! budget never eats into the next. Outputs of a completed phase are merged
//! into the parameters seen by later phases.
//!
//! # Failure semantics
//!
//! The first failing phase stops the action. Nothing is rolled back: side
//! effects of completed phases stay in place, and their outputs are handed
//! back in the [`RunFailure`] for inspection or manual cleanup.

use crate::blueprint::{Action, Blueprint};
use crate::cancel::{self, CancelToken, ExecContext, Services};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::function::{PhaseOutputs, TemplateParams};
use crate::registry::FunctionRegistry;
use crate::validate::validate_action;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A run that stopped before completing every phase
#[derive(Debug)]
pub struct RunFailure {
    /// Name of the failing phase; `None` if the run failed before any phase
    pub phase: Option<String>,
    /// Position of the failing phase within the action
    pub index: Option<usize>,
    /// Underlying cause
    pub source: Error,
    /// Outputs of the phases that completed
    pub completed: PhaseOutputs,
}

impl RunFailure {
    fn before_start(source: Error) -> Self {
        Self {
            phase: None,
            index: None,
            source,
            completed: PhaseOutputs::new(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.phase, self.index) {
            (Some(phase), Some(index)) => {
                write!(f, "Failed to run phase {index} ({phase}): {}", self.source)
            }
            _ => write!(f, "Failed to start action: {}", self.source),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Sequential phase executor
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    root: ExecContext,
}

impl ExecutionEngine {
    /// Create engine over a registry with default configuration
    #[must_use]
    pub fn new(registry: impl Into<Arc<FunctionRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            config: EngineConfig::default(),
            root: ExecContext::new(),
        }
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With collaborators made available to every function
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.root = ExecContext::with_services(services);
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry used to resolve functions
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Token cancelling every run of this engine
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.root.token().clone()
    }

    /// Run one action of a blueprint
    ///
    /// # Errors
    /// [`RunFailure`] wrapping [`Error::ActionNotFound`] or the first phase
    /// failure
    pub async fn run_blueprint(
        &self,
        blueprint: &Blueprint,
        action: &str,
        params: TemplateParams,
    ) -> Result<PhaseOutputs, RunFailure> {
        let found = blueprint
            .action(action)
            .ok_or_else(|| RunFailure::before_start(Error::ActionNotFound(action.to_string())))?;
        tracing::info!(action, "running action");
        self.run(found, params).await
    }

    /// Run the phases of an action in order
    ///
    /// # Errors
    /// [`RunFailure`] identifying the failing phase and carrying the outputs of
    /// completed phases
    pub async fn run(
        &self,
        action: &Action,
        mut params: TemplateParams,
    ) -> Result<PhaseOutputs, RunFailure> {
        if self.config.validate_before_run {
            validate_action(&self.registry, action).map_err(RunFailure::before_start)?;
        }

        let mut completed = PhaseOutputs::new();
        for (index, phase) in action.phases.iter().enumerate() {
            let fail = |source: Error, completed: PhaseOutputs| RunFailure {
                phase: Some(phase.name.clone()),
                index: Some(index),
                source,
                completed,
            };

            let function = match self.registry.resolve(&phase.func) {
                Ok(f) => f,
                Err(e) => return Err(fail(e, completed)),
            };

            let timeout = self.config.phase_timeout();
            let phase_ctx = match timeout {
                Some(t) => self.root.with_timeout(t),
                None => self.root.child(),
            };

            tracing::info!(phase = %phase.name, func = %phase.func, index, "executing phase");
            let started = Instant::now();
            let outcome = cancel::race(&phase_ctx, function.exec(&phase_ctx, &params, &phase.args)).await;
            // anything the function left running under this context stops here
            phase_ctx.cancel();

            let result = outcome.unwrap_or_else(|done| {
                Err(done.into_error(&phase.name, &timeout_message(&phase.name, &phase.func, timeout)))
            });

            match result {
                Ok(outputs) => {
                    tracing::info!(
                        phase = %phase.name,
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        outputs = outputs.len(),
                        "phase completed"
                    );
                    params.phases.insert(phase.name.clone(), outputs.clone());
                    completed.insert(phase.name.clone(), outputs);
                }
                Err(e) => {
                    tracing::error!(phase = %phase.name, error = %e, "phase failed");
                    return Err(fail(e, completed));
                }
            }
        }
        Ok(completed)
    }
}

fn timeout_message(phase: &str, func: &str, timeout: Option<Duration>) -> String {
    let within = timeout.unwrap_or_default();
    format!(
        "Phase {phase} ({func}) did not complete within {within:?} and was cancelled. \
         Please check the health of the systems it depends on."
    )
}
