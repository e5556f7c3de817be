//! Capability, input, and output validation.
//!
//! Pure functions over the document types: a structural gate for the
//! capability itself, a recursive schema validator for values, and the
//! output-formatting pass that collects declared outputs from per-task
//! results after a run.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::capability::types::{
    Capability, Parameter, Schema, SchemaType, ValueMap, CAPABILITY_TYPE_ATOMIC,
    CAPABILITY_TYPE_COMPOSITE,
};
use crate::error::{EngineError, EngineResult};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:[Zz]|[+-]\d{2}:\d{2})?$")
        .expect("date-time regex")
});

/// JSON type descriptor used in violation messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, schema_type: SchemaType) -> bool {
    match schema_type {
        SchemaType::String => value.is_string(),
        SchemaType::Number => value.is_number(),
        SchemaType::Integer => value
            .as_f64()
            .map(|n| n.fract() == 0.0)
            .unwrap_or(false),
        SchemaType::Boolean => value.is_boolean(),
        SchemaType::Array => value.is_array(),
        SchemaType::Object => value.is_object(),
    }
}

/// Validate a value against a schema node.
///
/// Checks run in a fixed order, each only when the corresponding schema
/// attribute is present: type (fatal immediately on mismatch), string
/// format, enum membership, inclusive numeric bounds, string pattern, then
/// nested item/property schemas. Every violation names the field label, the
/// violated constraint, and a descriptor of the offending value.
pub fn validate_value(value: &Value, schema: &Schema, label: &str) -> EngineResult<()> {
    // A type mismatch makes the remaining checks meaningless, so stop here.
    if !matches_type(value, schema.schema_type) {
        return Err(EngineError::TypeMismatch {
            label: label.to_string(),
            expected: schema.schema_type.as_str().to_string(),
            actual: type_name(value).to_string(),
        });
    }

    if let (Some(format), Some(s)) = (&schema.format, value.as_str()) {
        let matcher: Option<&Regex> = match format.as_str() {
            "email" => Some(&EMAIL_RE),
            "date-time" => Some(&DATE_TIME_RE),
            // Unrecognized format names are ignored, not an error.
            _ => None,
        };
        if let Some(re) = matcher {
            if !re.is_match(s) {
                return Err(EngineError::FormatMismatch {
                    label: label.to_string(),
                    format: format.clone(),
                });
            }
        }
    }

    if let Some(allowed) = &schema.allowed_values {
        if !allowed.iter().any(|candidate| candidate == value) {
            return Err(EngineError::EnumMismatch {
                label: label.to_string(),
                value: value.to_string(),
            });
        }
    }

    if schema.minimum.is_some() || schema.maximum.is_some() {
        if let Some(n) = value.as_f64() {
            let below = schema.minimum.map(|min| n < min).unwrap_or(false);
            let above = schema.maximum.map(|max| n > max).unwrap_or(false);
            if below || above {
                return Err(EngineError::OutOfRange {
                    label: label.to_string(),
                    value: n,
                    range: describe_range(schema.minimum, schema.maximum),
                });
            }
        }
    }

    if let (Some(pattern), Some(s)) = (&schema.pattern, value.as_str()) {
        // The pattern is used verbatim; anchoring is the author's choice.
        let re = Regex::new(pattern).map_err(|e| {
            EngineError::Execution(format!("{}: invalid schema pattern: {}", label, e))
        })?;
        if !re.is_match(s) {
            return Err(EngineError::PatternMismatch {
                label: label.to_string(),
                pattern: pattern.clone(),
            });
        }
    }

    if let (Some(item_schema), Some(items)) = (&schema.items, value.as_array()) {
        for (i, item) in items.iter().enumerate() {
            validate_value(item, item_schema, &format!("{}[{}]", label, i))?;
        }
    }

    if let (Some(properties), Some(object)) = (&schema.properties, value.as_object()) {
        for (name, property_schema) in properties {
            if let Some(property) = object.get(name) {
                validate_value(property, property_schema, &format!("{}.{}", label, name))?;
            }
        }
    }

    Ok(())
}

fn describe_range(minimum: Option<f64>, maximum: Option<f64>) -> String {
    match (minimum, maximum) {
        (Some(min), Some(max)) => format!(">= {}, <= {}", min, max),
        (Some(min), None) => format!(">= {}", min),
        (None, Some(max)) => format!("<= {}", max),
        (None, None) => String::new(),
    }
}

/// Shallow structural gate for a capability document.
///
/// Verifies the required top-level fields are present and the discriminator
/// is valid. Task/flow consistency is deliberately not checked here; a
/// dangling flow reference surfaces during execution.
pub fn validate_structure(capability: &Capability) -> EngineResult<()> {
    let required: [(&str, bool); 7] = [
        ("spec_version", capability.spec_version.is_empty()),
        ("id", capability.id.is_empty()),
        ("description", capability.description.is_empty()),
        ("version", capability.version.is_empty()),
        ("type", capability.capability_type.is_empty()),
        ("tasks", capability.tasks.is_empty()),
        ("flow", capability.flow.is_empty()),
    ];
    for (field, missing) in required {
        if missing {
            return Err(EngineError::MissingField(field.to_string()));
        }
    }

    match capability.capability_type.as_str() {
        CAPABILITY_TYPE_ATOMIC | CAPABILITY_TYPE_COMPOSITE => Ok(()),
        other => Err(EngineError::InvalidCapabilityType(other.to_string())),
    }
}

/// Validate caller-supplied inputs against the declared parameters.
///
/// Required-and-absent is a failure; present values are validated against
/// their schema. Extra keys in `values` are ignored.
pub fn validate_inputs(parameters: &[Parameter], values: &ValueMap) -> EngineResult<()> {
    for parameter in parameters {
        match values.get(&parameter.name) {
            Some(value) => {
                if let Some(schema) = &parameter.schema {
                    validate_value(value, schema, &format!("inputs.{}", parameter.name))?;
                }
            }
            None => {
                if parameter.required {
                    return Err(EngineError::MissingRequiredInput(parameter.name.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Collect declared outputs from the accumulated per-task results.
///
/// For each declared output the scan takes the first task result (in
/// task-execution order) that defines the name; earlier steps win when
/// several tasks produce the same output. An undeclared-by-any-task output
/// lands as null rather than failing the run. Found values with a declared
/// schema are validated; a violation aborts the whole run. With no declared
/// outputs the raw per-task results map is returned unchanged.
pub fn format_outputs(
    outputs: &[Parameter],
    results: &IndexMap<String, ValueMap>,
) -> EngineResult<ValueMap> {
    if outputs.is_empty() {
        let mut raw = ValueMap::new();
        for (task_id, task_result) in results {
            raw.insert(task_id.clone(), Value::Object(task_result.clone()));
        }
        return Ok(raw);
    }

    let mut formatted = ValueMap::new();
    for output in outputs {
        let found = results
            .values()
            .find_map(|task_result| task_result.get(&output.name).cloned());
        match found {
            Some(value) => {
                if let Some(schema) = &output.schema {
                    validate_value(&value, schema, &format!("outputs.{}", output.name))?;
                }
                formatted.insert(output.name.clone(), value);
            }
            None => {
                formatted.insert(output.name.clone(), Value::Null);
            }
        }
    }
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::types::{Task, CAPABILITY_TYPE_ATOMIC};
    use serde_json::json;

    fn label_of(result: EngineResult<()>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn type_mismatch_is_fatal_and_first() {
        // The value also violates the enum, but the type error wins.
        let schema = Schema::string().with_allowed_values(vec![json!("a")]);
        let err = validate_value(&json!(3), &schema, "inputs.x").unwrap_err();
        assert_eq!(err.code(), "InvalidType");
        assert!(err.to_string().contains("inputs.x"));
    }

    #[test]
    fn integer_rejects_fractional_component() {
        let schema = Schema::integer();
        assert!(validate_value(&json!(3), &schema, "n").is_ok());
        assert!(validate_value(&json!(3.0), &schema, "n").is_ok());
        let err = validate_value(&json!(3.5), &schema, "n").unwrap_err();
        assert_eq!(err.code(), "InvalidType");
    }

    #[test]
    fn known_formats_enforced_unknown_ignored() {
        let email = Schema::string().with_format("email");
        assert!(validate_value(&json!("ada@example.com"), &email, "e").is_ok());
        assert_eq!(
            validate_value(&json!("not-an-email"), &email, "e")
                .unwrap_err()
                .code(),
            "InvalidFormat"
        );

        let dt = Schema::string().with_format("date-time");
        assert!(validate_value(&json!("2026-08-05T12:30:00Z"), &dt, "t").is_ok());
        assert!(validate_value(&json!("yesterday"), &dt, "t").is_err());

        let custom = Schema::string().with_format("uuid-ish");
        assert!(validate_value(&json!("anything"), &custom, "u").is_ok());
    }

    #[test]
    fn enum_membership_is_deep_equality() {
        let schema = Schema::string().with_allowed_values(vec![json!("english"), json!("spanish")]);
        assert!(validate_value(&json!("spanish"), &schema, "lang").is_ok());
        let err = validate_value(&json!("latin"), &schema, "lang").unwrap_err();
        assert_eq!(err.code(), "InvalidEnum");
        assert!(label_of(Err(err)).contains("lang"));
    }

    #[test]
    fn bounds_are_inclusive() {
        let schema = Schema::number().with_range(Some(0.0), Some(150.0));
        assert!(validate_value(&json!(0), &schema, "age").is_ok());
        assert!(validate_value(&json!(150), &schema, "age").is_ok());
        assert_eq!(
            validate_value(&json!(-1), &schema, "age").unwrap_err().code(),
            "OutOfRange"
        );
        assert_eq!(
            validate_value(&json!(151), &schema, "age")
                .unwrap_err()
                .code(),
            "OutOfRange"
        );
    }

    #[test]
    fn pattern_is_used_verbatim() {
        // Unanchored pattern matches anywhere in the string.
        let schema = Schema::string().with_pattern("[0-9]{3}");
        assert!(validate_value(&json!("abc123def"), &schema, "code").is_ok());
        assert_eq!(
            validate_value(&json!("abcdef"), &schema, "code")
                .unwrap_err()
                .code(),
            "PatternMismatch"
        );
    }

    #[test]
    fn nested_items_and_properties_validate() {
        let mut props = std::collections::BTreeMap::new();
        props.insert("count".to_string(), Schema::integer());
        let schema = Schema {
            items: None,
            properties: Some(props),
            ..Schema::new(SchemaType::Object)
        };
        assert!(validate_value(&json!({"count": 2}), &schema, "o").is_ok());
        let err = validate_value(&json!({"count": "two"}), &schema, "o").unwrap_err();
        assert!(err.to_string().contains("o.count"));

        let list = Schema {
            items: Some(Box::new(Schema::string())),
            ..Schema::new(SchemaType::Array)
        };
        let err = validate_value(&json!(["a", 1]), &list, "tags").unwrap_err();
        assert!(err.to_string().contains("tags[1]"));
    }

    #[test]
    fn structure_gate_reports_each_missing_field() {
        let mut cap = Capability::new("", "", "", "");
        cap.spec_version.clear();
        let err = validate_structure(&cap).unwrap_err();
        assert_eq!(err.code(), "MissingField");

        let cap = Capability::new("id", "desc", "1.0.0", "atomic");
        // tasks and flow still empty
        assert!(matches!(
            validate_structure(&cap),
            Err(EngineError::MissingField(field)) if field == "tasks"
        ));
    }

    #[test]
    fn structure_gate_rejects_unknown_discriminator() {
        let cap = Capability::new("id", "desc", "1.0.0", "parallel")
            .with_task(Task::script("main", "javascript", "output.a = 1;"));
        let err = validate_structure(&cap).unwrap_err();
        assert_eq!(err.code(), "InvalidType");
        assert!(err.to_string().contains("parallel"));
    }

    #[test]
    fn structure_gate_accepts_both_discriminators() {
        for ty in ["atomic", "composite"] {
            let cap = Capability::new("id", "desc", "1.0.0", ty)
                .with_task(Task::script("main", "javascript", "output.a = 1;"));
            assert!(validate_structure(&cap).is_ok(), "type {}", ty);
        }
        // Same input twice yields the same outcome; validation has no state.
        let cap = Capability::new("id", "desc", "1.0.0", CAPABILITY_TYPE_ATOMIC)
            .with_task(Task::script("main", "javascript", "output.a = 1;"));
        assert!(validate_structure(&cap).is_ok());
        assert!(validate_structure(&cap).is_ok());
    }

    #[test]
    fn required_input_must_be_present() {
        let params = vec![
            Parameter::new("name").required().with_schema(Schema::string()),
            Parameter::new("verbose"),
        ];
        let mut values = ValueMap::new();
        values.insert("verbose".to_string(), json!(true));
        let err = validate_inputs(&params, &values).unwrap_err();
        assert_eq!(err.code(), "MissingRequiredInput");

        values.insert("name".to_string(), json!("Ada"));
        assert!(validate_inputs(&params, &values).is_ok());
    }

    #[test]
    fn extra_input_keys_are_ignored() {
        let params = vec![Parameter::new("name").with_schema(Schema::string())];
        let mut values = ValueMap::new();
        values.insert("name".to_string(), json!("Ada"));
        values.insert("unexpected".to_string(), json!(42));
        assert!(validate_inputs(&params, &values).is_ok());
    }

    fn task_result(pairs: &[(&str, Value)]) -> ValueMap {
        let mut map = ValueMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        map
    }

    #[test]
    fn first_task_defining_an_output_wins() {
        let mut results = IndexMap::new();
        results.insert("first".to_string(), task_result(&[("x", json!(1))]));
        results.insert("second".to_string(), task_result(&[("x", json!(2))]));

        let outputs = vec![Parameter::new("x")];
        let formatted = format_outputs(&outputs, &results).unwrap();
        assert_eq!(formatted.get("x"), Some(&json!(1)));
    }

    #[test]
    fn undefined_output_becomes_null_not_error() {
        let mut results = IndexMap::new();
        results.insert("only".to_string(), task_result(&[("x", json!(1))]));

        let outputs = vec![Parameter::new("x"), Parameter::new("missing")];
        let formatted = format_outputs(&outputs, &results).unwrap();
        assert_eq!(formatted.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn declared_schema_violation_aborts_formatting() {
        let mut results = IndexMap::new();
        results.insert("only".to_string(), task_result(&[("x", json!("nope"))]));

        let outputs = vec![Parameter::new("x").with_schema(Schema::number())];
        let err = format_outputs(&outputs, &results).unwrap_err();
        assert_eq!(err.code(), "InvalidType");
    }

    #[test]
    fn satisfying_output_round_trips_unchanged() {
        let mut results = IndexMap::new();
        results.insert("only".to_string(), task_result(&[("x", json!(41.5))]));

        let outputs = vec![Parameter::new("x").with_schema(Schema::number())];
        let formatted = format_outputs(&outputs, &results).unwrap();
        assert_eq!(formatted.get("x"), Some(&json!(41.5)));
    }

    #[test]
    fn no_declared_outputs_returns_raw_results() {
        let mut results = IndexMap::new();
        results.insert("a".to_string(), task_result(&[("x", json!(1))]));
        let formatted = format_outputs(&[], &results).unwrap();
        assert_eq!(formatted.get("a"), Some(&json!({"x": 1})));
    }
}
