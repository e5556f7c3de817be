//! Execution backends.
//!
//! Every backend implements the same four-operation contract; the engine is
//! backend-agnostic and new variants are added by registering a constructor
//! with the factory, without touching the orchestration loop. The variants
//! differ only in where code runs: in-process through the script evaluator,
//! inside a container, or on a remote workflow service.

pub mod docker;
pub mod factory;
pub mod local;
pub mod windmill;

pub use docker::DockerProvider;
pub use factory::ProviderFactory;
pub use local::LocalProvider;
pub use windmill::WindmillProvider;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::capability::types::{EnvVarSpec, Task, TaskDependencies, ValueMap};
use crate::error::{EngineError, EngineResult};

/// The uniform backend contract.
///
/// One instance serves exactly one run: the engine creates it through the
/// factory, calls `setup`/`execute_code`/`cleanup` per flow step, and tears
/// it down defensively on every error path. `cleanup` must therefore be safe
/// to call when `setup` or `execute_code` never ran or already failed.
#[async_trait]
pub trait ExecutionProvider: Send + Sync + std::fmt::Debug {
    /// Backend name, recorded in result metadata.
    fn name(&self) -> &'static str;

    /// Prepare whatever context the backend needs to run this task, such as
    /// allocating a sandbox or installing declared dependencies.
    async fn setup(
        &mut self,
        task: &Task,
        dependencies: Option<&TaskDependencies>,
    ) -> EngineResult<bool>;

    /// Run the task's code with the caller inputs and resolved environment,
    /// returning the task's output bindings. Failures are errors, never a
    /// failure-shaped return value.
    async fn execute_code(
        &self,
        task: &Task,
        inputs: &ValueMap,
        environment: &HashMap<String, Value>,
    ) -> EngineResult<ValueMap>;

    /// Release backend resources.
    async fn cleanup(&mut self) -> EngineResult<bool>;

    /// Resolve declared environment variables. The default policy looks the
    /// variable up in the host environment, then falls back to the declared
    /// default, then the schema default, and fails only for a required
    /// variable with no value from any source.
    fn resolve_environment_variables(
        &self,
        variables: &[EnvVarSpec],
    ) -> EngineResult<HashMap<String, Value>> {
        resolve_host_environment(variables)
    }
}

/// Host-environment lookup for a single variable name.
///
/// Case-insensitive platforms match the name against every host variable
/// ignoring case; everywhere else the lookup is exact.
pub(crate) fn lookup_host_var(name: &str) -> Option<String> {
    #[cfg(windows)]
    {
        std::env::vars()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
    #[cfg(not(windows))]
    {
        std::env::var(name).ok()
    }
}

/// Shared host-based resolution policy used by all built-in backends.
pub fn resolve_host_environment(
    variables: &[EnvVarSpec],
) -> EngineResult<HashMap<String, Value>> {
    let mut resolved = HashMap::new();
    for variable in variables {
        if let Some(value) = lookup_host_var(&variable.name) {
            resolved.insert(variable.name.clone(), Value::String(value));
            continue;
        }
        let fallback = variable
            .default
            .clone()
            .or_else(|| variable.schema.as_ref().and_then(|s| s.default.clone()));
        match fallback {
            Some(value) => {
                resolved.insert(variable.name.clone(), value);
            }
            None if variable.required => {
                return Err(EngineError::MissingRequiredEnvVar(variable.name.clone()));
            }
            None => {
                log::debug!(
                    "optional environment variable '{}' has no value; leaving it unset",
                    variable.name
                );
            }
        }
    }
    Ok(resolved)
}
