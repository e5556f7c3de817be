//! Capability documents and their validation.

pub mod types;
pub mod validation;

pub use types::{
    Capability, EnvVarSpec, EnvironmentSpec, FlowStep, PackageDependency, Parameter,
    ResourceHints, Schema, SchemaType, Task, TaskDependencies, ValueMap,
    CAPABILITY_TYPE_ATOMIC, CAPABILITY_TYPE_COMPOSITE,
};
pub use validation::{format_outputs, validate_inputs, validate_structure, validate_value};
