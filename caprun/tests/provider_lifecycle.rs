//! Provider lifecycle accounting.
//!
//! A counting backend registered through the public factory hook verifies
//! the engine's resource discipline: cleanup always runs at least as often
//! as setup, failures trigger exactly the cleanups the contract promises,
//! and validation failures never touch a backend at all.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use caprun::capability::{
    Capability, EnvVarSpec, EnvironmentSpec, Parameter, Task, TaskDependencies, ValueMap,
    CAPABILITY_TYPE_ATOMIC, CAPABILITY_TYPE_COMPOSITE,
};
use caprun::engine::{CapabilityEngine, ExecutionOptions};
use caprun::error::{EngineError, EngineResult};
use caprun::providers::ExecutionProvider;
use caprun::EngineConfig;

#[derive(Default, Debug)]
struct Counters {
    constructed: AtomicUsize,
    setup: AtomicUsize,
    execute: AtomicUsize,
    cleanup: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> (usize, usize, usize, usize) {
        (
            self.constructed.load(Ordering::SeqCst),
            self.setup.load(Ordering::SeqCst),
            self.execute.load(Ordering::SeqCst),
            self.cleanup.load(Ordering::SeqCst),
        )
    }
}

#[derive(Debug)]
struct CountingProvider {
    counters: Arc<Counters>,
}

#[async_trait]
impl ExecutionProvider for CountingProvider {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn setup(
        &mut self,
        _task: &Task,
        _dependencies: Option<&TaskDependencies>,
    ) -> EngineResult<bool> {
        self.counters.setup.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn execute_code(
        &self,
        task: &Task,
        _inputs: &ValueMap,
        _environment: &HashMap<String, Value>,
    ) -> EngineResult<ValueMap> {
        self.counters.execute.fetch_add(1, Ordering::SeqCst);
        if task.id == "explode" {
            return Err(EngineError::Execution("task exploded".to_string()));
        }
        let mut out = ValueMap::new();
        out.insert("ran".to_string(), json!(task.id));
        Ok(out)
    }

    async fn cleanup(&mut self) -> EngineResult<bool> {
        self.counters.cleanup.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Engine whose default backend is the counting provider.
fn counting_engine() -> (CapabilityEngine, Arc<Counters>) {
    let mut config = EngineConfig::default();
    config.execution.environment = "counting".to_string();
    let mut engine = CapabilityEngine::new(config);
    let counters = Arc::new(Counters::default());
    let handle = counters.clone();
    engine.register_provider("counting", move |_| {
        handle.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingProvider {
            counters: handle.clone(),
        }))
    });
    (engine, counters)
}

fn two_step_capability() -> Capability {
    Capability::new("pair", "Two steps", "1.0.0", CAPABILITY_TYPE_COMPOSITE)
        .with_task(Task::script("first", "javascript", "unused"))
        .with_task(Task::script("second", "javascript", "unused"))
}

#[tokio::test]
async fn successful_run_cleans_up_after_every_step() {
    let (engine, counters) = counting_engine();
    let result = engine
        .execute(
            &two_step_capability(),
            &ValueMap::new(),
            &ExecutionOptions::default(),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(counters.snapshot(), (1, 2, 2, 2));
    assert_eq!(result.metadata.environment, "counting");
}

#[tokio::test]
async fn task_failure_aborts_the_run_and_still_cleans_up() {
    let (engine, counters) = counting_engine();
    let capability = Capability::new("bomb", "Fails mid-flow", "1.0.0", CAPABILITY_TYPE_COMPOSITE)
        .with_task(Task::script("first", "javascript", "unused"))
        .with_task(Task::script("explode", "javascript", "unused"))
        .with_task(Task::script("never-reached", "javascript", "unused"));

    let result = engine
        .execute(&capability, &ValueMap::new(), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "EXECUTION_ERROR");

    let (constructed, setup, execute, cleanup) = counters.snapshot();
    assert_eq!(constructed, 1);
    // The third step never starts.
    assert_eq!(setup, 2);
    assert_eq!(execute, 2);
    // Per-step cleanups plus the defensive one on the error path.
    assert!(cleanup >= setup, "cleanup {} < setup {}", cleanup, setup);
}

#[tokio::test]
async fn dangling_task_reference_cleans_up_exactly_once() {
    let (engine, counters) = counting_engine();
    let mut capability = two_step_capability();
    capability.flow[1].task = "ghost".to_string();

    let result = engine
        .execute(&capability, &ValueMap::new(), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, "TaskNotFound");
    assert!(error.message.contains("ghost"));

    let (_, setup, _, cleanup) = counters.snapshot();
    // The first step completed (setup + cleanup); the dangling reference
    // adds exactly one defensive cleanup, with no matching setup.
    assert_eq!(setup, 1);
    assert_eq!(cleanup, 2);
}

#[tokio::test]
async fn dangling_first_step_means_one_defensive_cleanup() {
    let (engine, counters) = counting_engine();
    let mut capability = Capability::new("ghostly", "Bad flow", "1.0.0", CAPABILITY_TYPE_ATOMIC)
        .with_task(Task::script("real", "javascript", "unused"));
    capability.flow[0].task = "ghost".to_string();

    let result = engine
        .execute(&capability, &ValueMap::new(), &ExecutionOptions::default())
        .await;

    assert_eq!(result.error.unwrap().code, "TaskNotFound");
    assert_eq!(counters.snapshot(), (1, 0, 0, 1));
}

#[tokio::test]
async fn validation_failure_never_constructs_a_provider() {
    let (engine, counters) = counting_engine();
    let capability = Capability::new("strict", "Requires input", "1.0.0", CAPABILITY_TYPE_ATOMIC)
        .with_input(Parameter::new("name").required())
        .with_task(Task::script("main", "javascript", "unused"));

    let result = engine
        .execute(&capability, &ValueMap::new(), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "MissingRequiredInput");
    assert_eq!(counters.snapshot(), (0, 0, 0, 0));
}

#[tokio::test]
async fn env_resolution_failure_cleans_up_before_any_setup() {
    let (engine, counters) = counting_engine();
    let capability = Capability::new("secretive", "Needs a var", "1.0.0", CAPABILITY_TYPE_ATOMIC)
        .with_task(Task::script("main", "javascript", "unused"))
        .with_environment(EnvironmentSpec {
            variables: vec![EnvVarSpec::new("CAPRUN_LIFECYCLE_ABSENT").required()],
            resources: None,
        });

    let result = engine
        .execute(&capability, &ValueMap::new(), &ExecutionOptions::default())
        .await;

    assert_eq!(result.error.unwrap().code, "MissingRequiredEnvVar");
    assert_eq!(counters.snapshot(), (1, 0, 0, 1));
}

#[tokio::test]
async fn execute_by_id_not_found_touches_no_backend() {
    let (engine, counters) = counting_engine();
    let registry = Arc::new(caprun::registry::InMemoryRegistry::new());
    let engine = engine.with_registry(registry);

    let result = engine.execute_by_id("does-not-exist", &ValueMap::new()).await;
    assert_eq!(result.error.unwrap().code, "NOT_FOUND");
    assert_eq!(counters.snapshot(), (0, 0, 0, 0));
}
