//! Stanza Core - blueprint engine
//!
//! The generic half of the engine:
//! - [`Blueprint`] / [`Action`] / [`Phase`]: declarative workflow model
//! - [`Function`]: capability implemented by every operation
//! - [`FunctionRegistry`]: name → function, frozen after start-up
//! - [`args`]: typed binding of untyped phase arguments
//! - [`validate`](validate::validate): fail-fast pre-flight checks
//! - [`ExecutionEngine`]: ordered, cancellation-bounded phase execution
//!
//! # Example
//!
//! ```rust,ignore
//! use stanza_core::prelude::*;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register(MyFunction)?;
//!
//! let blueprint = Blueprint::read_from_file("mysql.yaml")?;
//! validate(&registry, &blueprint)?;
//!
//! let engine = ExecutionEngine::new(registry);
//! let outputs = engine.run_blueprint(&blueprint, "backup", TemplateParams::new()).await?;
//! ```

#![warn(unreachable_pub)]

pub mod args;
pub mod blueprint;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod function;
pub mod registry;
pub mod validate;
pub mod value;

pub use blueprint::{Action, Blueprint, BlueprintError, Phase};
pub use cancel::{CancelToken, Done, ExecContext, Services};
pub use config::EngineConfig;
pub use engine::{ExecutionEngine, RunFailure};
pub use error::{BoxError, Error, Result};
pub use function::{Function, PhaseOutputs, TemplateParams, HOST_NAME_OPTION, USER_NAME_OPTION};
pub use registry::FunctionRegistry;
pub use value::{ArgMap, FromArg, OutputMap, Value};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for implementing and running functions
    pub use crate::args::{arg, arg_exists, opt_arg};
    pub use crate::validate::validate;
    pub use crate::{
        Action, ArgMap, Blueprint, EngineConfig, Error, ExecContext, ExecutionEngine, Function,
        FunctionRegistry, OutputMap, Phase, Result, Services, TemplateParams, Value,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
