//! Capability document types.
//!
//! A capability is a versioned, schema-described unit of executable work:
//! one or more tasks wired together by a flow, plus declared inputs, outputs,
//! and environment requirements. Documents are plain serde data — they are
//! never mutated during a run, and structural problems are reported by the
//! validator at execution time rather than failing deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// Map of named JSON values, used for caller inputs and task outputs.
pub type ValueMap = serde_json::Map<String, Value>;

/// A declarative, versioned unit of executable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Protocol version tag of the capability document format.
    #[serde(default)]
    pub spec_version: String,
    /// Unique capability identifier (e.g. "format-greeting").
    #[serde(default)]
    pub id: String,
    /// Human-readable description of what the capability does.
    #[serde(default)]
    pub description: String,
    /// Semantic version of this capability.
    #[serde(default)]
    pub version: String,
    /// Discriminator: "atomic" (single task) or "composite" (multi-task flow).
    /// Kept as a string so the structural gate can report malformed values.
    #[serde(default, rename = "type")]
    pub capability_type: String,
    /// Author list.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Declared input parameters.
    #[serde(default)]
    pub inputs: Vec<Parameter>,
    /// Tasks available to the flow, keyed by their `id`.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Ordered execution steps, each referencing a task by id.
    #[serde(default)]
    pub flow: Vec<FlowStep>,
    /// Declared outputs collected from per-task results after the run.
    #[serde(default)]
    pub outputs: Vec<Parameter>,
    /// Environment requirements (variables and resource hints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSpec>,
}

/// Discriminator value for single-task capabilities.
pub const CAPABILITY_TYPE_ATOMIC: &str = "atomic";
/// Discriminator value for multi-task capabilities.
pub const CAPABILITY_TYPE_COMPOSITE: &str = "composite";

impl Capability {
    /// Create a capability with the required top-level fields populated.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
        capability_type: impl Into<String>,
    ) -> Self {
        Self {
            spec_version: default_spec_version(),
            id: id.into(),
            description: description.into(),
            version: version.into(),
            capability_type: capability_type.into(),
            authors: Vec::new(),
            inputs: Vec::new(),
            tasks: Vec::new(),
            flow: Vec::new(),
            outputs: Vec::new(),
            environment: None,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_input(mut self, input: Parameter) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add a task and a flow step referencing it, in one go.
    pub fn with_task(mut self, task: Task) -> Self {
        self.flow.push(FlowStep {
            task: task.id.clone(),
        });
        self.tasks.push(task);
        self
    }

    pub fn with_output(mut self, output: Parameter) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentSpec) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Look up a task by id. Flow steps resolve through this at execution
    /// time; a dangling reference fails the run, not the load.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Parse a capability document from a JSON string.
    pub fn from_json(source: &str) -> EngineResult<Self> {
        serde_json::from_str(source)
            .map_err(|e| EngineError::Execution(format!("invalid capability document: {}", e)))
    }

    /// Load a capability document from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&source)
    }
}

fn default_spec_version() -> String {
    "1.0".to_string()
}

/// A declared input or output parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Only meaningful for inputs; outputs ignore it.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            schema: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Primitive type tag of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }
}

/// Recursive structural descriptor for parameter and environment values.
///
/// No cycles are possible: nested schemas are owned, so depth is bounded by
/// the document size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    /// Named string format ("email", "date-time"); unknown names are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Default value, used by environment resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Enumerated allowed values; membership is deep equality.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    /// Item schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    /// Property schemas for objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    /// Inclusive numeric lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Regex the string value must match, used verbatim (not auto-anchored).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Schema {
    pub fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            format: None,
            default: None,
            allowed_values: None,
            items: None,
            properties: None,
            minimum: None,
            maximum: None,
            pattern: None,
        }
    }

    pub fn string() -> Self {
        Self::new(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::new(SchemaType::Number)
    }

    pub fn integer() -> Self {
        Self::new(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaType::Boolean)
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// A single executable unit within a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within the capability.
    pub id: String,
    /// Task kind tag (e.g. "script").
    #[serde(default, rename = "type")]
    pub task_type: String,
    /// Source language tag ("javascript", "typescript", "python", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Inline source code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Runtime/package requirements for backends that install dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<TaskDependencies>,
}

impl Task {
    /// Create a script task with inline source code.
    pub fn script(
        id: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: "script".to_string(),
            language: Some(language.into()),
            code: Some(code.into()),
            dependencies: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: TaskDependencies) -> Self {
        self.dependencies = Some(dependencies);
        self
    }
}

/// Runtime version plus named packages a task needs installed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskDependencies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default)]
    pub packages: Vec<PackageDependency>,
}

/// A named package with an optional version constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One step of the flow: a reference to a task by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub task: String,
}

/// Environment requirements declared by a capability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub variables: Vec<EnvVarSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceHints>,
}

/// A named environment variable requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// Fallback when the backend cannot resolve the variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Optional schema; its `default` is the second fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

impl EnvVarSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            schema: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Resource hints a backend may honor (the engine itself enforces neither).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_wires_flow_steps() {
        let cap = Capability::new("greet", "Greets people", "1.0.0", CAPABILITY_TYPE_ATOMIC)
            .with_task(Task::script("main", "javascript", "output.ok = true;"));

        assert_eq!(cap.flow.len(), 1);
        assert_eq!(cap.flow[0].task, "main");
        assert!(cap.task("main").is_some());
        assert!(cap.task("missing").is_none());
    }

    #[test]
    fn document_roundtrip() {
        let cap = Capability::new("greet", "Greets people", "1.0.0", CAPABILITY_TYPE_COMPOSITE)
            .with_input(
                Parameter::new("name")
                    .required()
                    .with_schema(Schema::string()),
            )
            .with_task(Task::script("main", "javascript", "output.x = 1;"))
            .with_output(Parameter::new("x").with_schema(Schema::number()));

        let text = serde_json::to_string(&cap).unwrap();
        let parsed = Capability::from_json(&text).unwrap();
        assert_eq!(parsed.id, "greet");
        assert_eq!(parsed.capability_type, "composite");
        assert_eq!(parsed.inputs.len(), 1);
        assert!(parsed.inputs[0].required);
    }

    #[test]
    fn malformed_document_still_deserializes() {
        // Missing fields land as defaults; the validator reports them later.
        let cap = Capability::from_json(r#"{"id": "partial"}"#).unwrap();
        assert_eq!(cap.id, "partial");
        assert!(cap.version.is_empty());
        assert!(cap.tasks.is_empty());
    }

    #[test]
    fn schema_enum_field_uses_json_name() {
        let schema: Schema = serde_json::from_value(json!({
            "type": "string",
            "enum": ["english", "spanish"]
        }))
        .unwrap();
        assert_eq!(schema.allowed_values.as_ref().unwrap().len(), 2);
    }
}
