//! The capability execution engine.
//!
//! Orchestrates a run end to end: structural and input validation, backend
//! acquisition through the provider factory, environment resolution, the
//! sequential flow loop with its per-step cleanup guarantee, output
//! formatting, and the final result record. Every failure along the way is
//! caught at this boundary and converted into a failed [`ExecutionResult`];
//! nothing escapes to the caller as an error.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::types::{Capability, ValueMap};
use crate::capability::validation::{format_outputs, validate_inputs, validate_structure};
use crate::config::{DockerOptions, EngineConfig, WindmillOptions};
use crate::error::{EngineError, EngineResult};
use crate::providers::{ExecutionProvider, ProviderFactory};
use crate::registry::CapabilityRegistry;

/// Per-call overrides for a single run. Caller options win over the engine
/// configuration's defaults.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Backend name; defaults to `execution.environment` from the config.
    pub environment: Option<String>,
    /// Replacement option bundle for the containerized backend.
    pub docker: Option<DockerOptions>,
    /// Replacement option bundle for the remote-workflow backend.
    pub windmill: Option<WindmillOptions>,
    /// Environment variables merged over the backend-resolved values.
    pub environment_overrides: HashMap<String, Value>,
}

/// Outcome record for a capability run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Aggregated outputs; present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<ValueMap>,
    /// Structured failure; present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Human-readable cause.
    pub message: String,
    /// Stable machine-readable category.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub capability_id: String,
    pub capability_version: String,
    pub executed_at: DateTime<Utc>,
    /// Name of the backend the run used (or would have used).
    pub environment: String,
}

impl ExecutionResult {
    fn success(outputs: ValueMap, metadata: ExecutionMetadata) -> Self {
        Self {
            success: true,
            outputs: Some(outputs),
            error: None,
            metadata,
        }
    }

    fn failure(error: EngineError, metadata: ExecutionMetadata) -> Self {
        Self {
            success: false,
            outputs: None,
            error: Some(ExecutionFailure {
                message: error.to_string(),
                code: error.code().to_string(),
                details: None,
            }),
            metadata,
        }
    }
}

pub struct CapabilityEngine {
    config: EngineConfig,
    factory: ProviderFactory,
    registry: Option<Arc<dyn CapabilityRegistry>>,
}

impl CapabilityEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            factory: ProviderFactory::with_defaults(),
            registry: None,
        }
    }

    /// Attach a capability registry, enabling [`CapabilityEngine::execute_by_id`].
    pub fn with_registry(mut self, registry: Arc<dyn CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register an additional backend constructor under `name`.
    pub fn register_provider(
        &mut self,
        name: &str,
        constructor: impl Fn(&EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>>
            + Send
            + Sync
            + 'static,
    ) {
        self.factory.register(name, constructor);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a capability. Never returns an error: every failure becomes a
    /// failed result with `error.code` set.
    pub async fn execute(
        &self,
        capability: &Capability,
        inputs: &ValueMap,
        options: &ExecutionOptions,
    ) -> ExecutionResult {
        let backend = options
            .environment
            .clone()
            .unwrap_or_else(|| self.config.execution.environment.clone());
        let mut metadata = ExecutionMetadata {
            capability_id: capability.id.clone(),
            capability_version: capability.version.clone(),
            executed_at: Utc::now(),
            environment: backend.clone(),
        };

        // Validation happens before any backend exists, so these failures
        // never allocate resources that would need releasing.
        if let Err(e) =
            validate_structure(capability).and_then(|_| validate_inputs(&capability.inputs, inputs))
        {
            return ExecutionResult::failure(e, metadata);
        }

        let effective = self.effective_config(capability, options);
        let mut provider = match self.factory.get_provider(&backend, &effective) {
            Ok(provider) => provider,
            Err(e) => return ExecutionResult::failure(e, metadata),
        };
        metadata.environment = provider.name().to_string();
        log::debug!(
            "executing capability '{}' v{} on backend '{}'",
            capability.id,
            capability.version,
            provider.name()
        );

        match self.run(capability, inputs, options, provider.as_mut()).await {
            Ok(outputs) => ExecutionResult::success(outputs, metadata),
            Err(e) => {
                // Best-effort teardown; a secondary failure here must never
                // mask the original error.
                if let Err(cleanup_err) = provider.cleanup().await {
                    log::warn!(
                        "cleanup after failed run of '{}' also failed: {}",
                        capability.id,
                        cleanup_err
                    );
                }
                ExecutionResult::failure(e, metadata)
            }
        }
    }

    /// Look a capability up in the attached registry and run it. A missing
    /// capability becomes a failed result with code `NOT_FOUND`; no backend
    /// is ever touched in that case.
    pub async fn execute_by_id(&self, id: &str, inputs: &ValueMap) -> ExecutionResult {
        let metadata = ExecutionMetadata {
            capability_id: id.to_string(),
            capability_version: String::new(),
            executed_at: Utc::now(),
            environment: self.config.execution.environment.clone(),
        };
        let registry = match &self.registry {
            Some(registry) => registry,
            None => {
                return ExecutionResult::failure(
                    EngineError::Execution("no capability registry configured".to_string()),
                    metadata,
                )
            }
        };
        match registry.lookup(id).await {
            Ok(Some(capability)) => {
                self.execute(&capability, inputs, &ExecutionOptions::default())
                    .await
            }
            Ok(None) => ExecutionResult::failure(EngineError::NotFound(id.to_string()), metadata),
            Err(e) => ExecutionResult::failure(e, metadata),
        }
    }

    /// Engine configuration with the caller's per-run overrides applied.
    /// Capability resource hints fill option slots the caller left unset.
    fn effective_config(
        &self,
        capability: &Capability,
        options: &ExecutionOptions,
    ) -> EngineConfig {
        let mut config = self.config.clone();
        if let Some(environment) = &options.environment {
            config.execution.environment = environment.clone();
        }
        if let Some(docker) = &options.docker {
            config.docker = docker.clone();
        }
        if let Some(windmill) = &options.windmill {
            config.windmill = windmill.clone();
        }
        let resources = capability
            .environment
            .as_ref()
            .and_then(|e| e.resources.as_ref());
        if config.docker.memory_mb.is_none() {
            config.docker.memory_mb = resources.and_then(|r| r.memory_mb);
        }
        if config.windmill.timeout_ms.is_none() {
            config.windmill.timeout_ms = resources.and_then(|r| r.timeout_ms);
        }
        config
    }

    async fn run(
        &self,
        capability: &Capability,
        inputs: &ValueMap,
        options: &ExecutionOptions,
        provider: &mut dyn ExecutionProvider,
    ) -> EngineResult<ValueMap> {
        let declared = capability
            .environment
            .as_ref()
            .map(|e| e.variables.as_slice())
            .unwrap_or(&[]);
        let mut environment = provider.resolve_environment_variables(declared)?;
        // Caller-supplied overrides win over backend-resolved values.
        for (name, value) in &options.environment_overrides {
            environment.insert(name.clone(), value.clone());
        }

        // Every task receives the original caller inputs; steps communicate
        // only through the environment and the results map.
        let mut results: IndexMap<String, ValueMap> = IndexMap::new();
        for step in &capability.flow {
            let task = capability
                .task(&step.task)
                .ok_or_else(|| EngineError::TaskNotFound(step.task.clone()))?;
            log::debug!("running flow step '{}'", task.id);
            provider.setup(task, task.dependencies.as_ref()).await?;
            let executed = provider.execute_code(task, inputs, &environment).await;
            // Per-step resources are released before the outcome is
            // inspected, so a failing task cannot leak its sandbox.
            if let Err(cleanup_err) = provider.cleanup().await {
                log::warn!(
                    "cleanup after task '{}' failed: {}",
                    task.id,
                    cleanup_err
                );
            }
            results.insert(task.id.clone(), executed?);
        }

        format_outputs(&capability.outputs, &results)
    }
}
