//! caprun — a capability execution engine.
//!
//! A capability is a declaratively-defined, versioned, schema-described unit
//! of work: one or more tasks wired together by a flow. The engine validates
//! the capability document and the caller-supplied inputs, acquires an
//! execution backend through the provider factory, resolves required
//! environment variables, executes each flow step through the uniform
//! [`providers::ExecutionProvider`] contract, collects and validates declared
//! outputs, and returns a structured [`engine::ExecutionResult`] — releasing
//! backend resources even when execution fails partway through.
//!
//! Three backends ship by default: an in-process sandboxed script evaluator
//! (`local`), a container-per-run backend driven through the docker CLI
//! (`docker`/`containerized`), and a remote workflow API client
//! (`windmill`/`remote-workflow`). New backends register through
//! [`engine::CapabilityEngine::register_provider`].

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod providers;
pub mod registry;
pub mod script;

pub use capability::{Capability, Parameter, Schema, SchemaType, Task, ValueMap};
pub use config::EngineConfig;
pub use engine::{CapabilityEngine, ExecutionOptions, ExecutionResult};
pub use error::{EngineError, EngineResult};
pub use providers::{ExecutionProvider, ProviderFactory};
pub use registry::{CapabilityRegistry, DirectoryRegistry, InMemoryRegistry};
