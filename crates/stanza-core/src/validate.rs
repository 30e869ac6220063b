//! Pre-flight blueprint validation
//!
//! Walks phases in declared order and checks that each names a registered
//! function and supplies all of its statically required arguments. The first
//! problem found is returned and the walk stops there.

use crate::blueprint::{Action, Blueprint};
use crate::error::{Error, Result};
use crate::registry::{self, FunctionRegistry};

/// Validate every action of a blueprint
///
/// Actions are checked in name order so the reported error is deterministic.
///
/// # Errors
/// The first [`Error::UnregisteredFunction`] or [`Error::MissingArgument`]
/// encountered
pub fn validate(registry: &FunctionRegistry, blueprint: &Blueprint) -> Result<()> {
    for (name, action) in &blueprint.actions {
        tracing::debug!(action = %name, phases = action.phases.len(), "validating action");
        validate_action(registry, action)?;
    }
    Ok(())
}

/// Validate the phases of a single action
///
/// # Errors
/// The first [`Error::UnregisteredFunction`] or [`Error::MissingArgument`]
/// encountered
pub fn validate_action(registry: &FunctionRegistry, action: &Action) -> Result<()> {
    for phase in &action.phases {
        let function = registry.resolve(&phase.func)?;
        if let Some(missing) = function
            .required_args()
            .iter()
            .find(|key| !phase.args.contains_key(**key))
        {
            return Err(Error::MissingArgument((*missing).to_string()));
        }
    }
    Ok(())
}

/// Validate against the process-wide registry
///
/// # Errors
/// As [`validate`]; an uninstalled registry knows no functions, so any phase
/// fails as unregistered
pub fn validate_global(blueprint: &Blueprint) -> Result<()> {
    match registry::global() {
        Some(registry) => validate(registry, blueprint),
        None => validate(&FunctionRegistry::new(), blueprint),
    }
}
