//! Function registry
//!
//! Provides [`FunctionRegistry`], the mapping from function name to
//! implementation. A registry is filled during start-up and then frozen:
//! [`install`] moves it into process-wide storage from which it can only be
//! read, so lookups never take a lock.

use crate::error::{Error, Result};
use crate::function::Function;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

static GLOBAL: OnceCell<FunctionRegistry> = OnceCell::new();

/// Registry of available functions
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, Arc<dyn Function>>,
}

impl FunctionRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its own name
    ///
    /// # Errors
    /// [`Error::DuplicateFunction`] if the name is already taken; the existing
    /// entry is left untouched
    pub fn register<F: Function + 'static>(&mut self, function: F) -> Result<()> {
        self.register_arc(Arc::new(function))
    }

    /// Register a shared function
    ///
    /// # Errors
    /// [`Error::DuplicateFunction`] if the name is already taken
    pub fn register_arc(&mut self, function: Arc<dyn Function>) -> Result<()> {
        let name = function.name();
        if self.functions.contains_key(name) {
            return Err(Error::DuplicateFunction(name.to_string()));
        }
        tracing::debug!(function = name, "registered function");
        self.functions.insert(name, function);
        Ok(())
    }

    /// Look up a function by name
    #[inline]
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    /// Look up a function, failing with the unregistered-function error
    ///
    /// # Errors
    /// [`Error::UnregisteredFunction`] when `name` is unknown
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.lookup(name)
            .ok_or_else(|| Error::UnregisteredFunction(name.to_string()))
    }

    /// Check if function exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// List all registered function names (sorted)
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.functions.keys().copied().collect()
    }

    /// Get number of registered functions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Freeze `registry` as the process-wide registry
///
/// # Errors
/// [`Error::RegistryAlreadyInstalled`] if a registry was installed before
pub fn install(registry: FunctionRegistry) -> Result<&'static FunctionRegistry> {
    GLOBAL
        .set(registry)
        .map_err(|_| Error::RegistryAlreadyInstalled)?;
    GLOBAL.get().ok_or(Error::RegistryAlreadyInstalled)
}

/// Install the registry produced by `init` unless one is already installed
///
/// `init` runs at most once per process.
///
/// # Errors
/// Whatever `init` returns (for example a duplicate registration)
pub fn get_or_install<F>(init: F) -> Result<&'static FunctionRegistry>
where
    F: FnOnce() -> Result<FunctionRegistry>,
{
    GLOBAL.get_or_try_init(init)
}

/// The process-wide registry, if installed
#[inline]
#[must_use]
pub fn global() -> Option<&'static FunctionRegistry> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::ExecContext;
    use crate::function::TemplateParams;
    use crate::value::{ArgMap, OutputMap};

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Function for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn required_args(&self) -> &'static [&'static str] {
            &[]
        }

        async fn exec(
            &self,
            _ctx: &ExecContext,
            _params: &TemplateParams,
            _args: &ArgMap,
        ) -> Result<OutputMap> {
            Ok(OutputMap::new())
        }
    }

    #[test]
    fn registry_new_empty() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = FunctionRegistry::new();
        registry.register(Named("KubeTask")).unwrap();

        assert!(registry.contains("KubeTask"));
        assert_eq!(registry.lookup("KubeTask").unwrap().name(), "KubeTask");
        assert!(registry.lookup("KubeTasks").is_none());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = FunctionRegistry::new();
        registry.register(Named("KubeExec")).unwrap();
        let err = registry.register(Named("KubeExec")).unwrap_err();
        assert!(matches!(err, Error::DuplicateFunction(ref n) if n == "KubeExec"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_resolve_unknown() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve("Nope").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Requested function {Nope} has not been registered"
        );
    }

    #[test]
    fn registry_names_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register(Named("b")).unwrap();
        registry.register(Named("a")).unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
