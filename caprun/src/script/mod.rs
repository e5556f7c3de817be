//! Sandboxed script evaluator for script-type tasks.
//!
//! The in-process backend runs task source through this evaluator instead of
//! handing it to an ambient runtime. The supported surface is a small,
//! side-effect-free statement language: `let`/`const` declarations,
//! assignment, `if`/`else`, and expressions over JSON values (literals,
//! member/index access, arithmetic with string concatenation, comparison,
//! logical operators, ternary). The only bindings in scope are `inputs`,
//! `environment`, and the mutable `output` object; scripts cannot reach the
//! host in any way.

pub mod interpreter;
pub mod lexer;
pub mod parser;

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::capability::types::ValueMap;

/// A lexing, parsing, or runtime fault inside a task script.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ScriptError(String);

impl ScriptError {
    pub fn new(message: String) -> Self {
        Self(message)
    }
}

/// Evaluate task source with the given inputs and resolved environment,
/// returning the `output` bindings the script produced.
pub fn evaluate(
    source: &str,
    inputs: &ValueMap,
    environment: &HashMap<String, Value>,
) -> Result<ValueMap, ScriptError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse(tokens)?;
    interpreter::evaluate(&program, inputs, environment)
}
