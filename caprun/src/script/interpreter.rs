//! Tree-walking interpreter over JSON values.
//!
//! The evaluation scope exposes exactly three bindings: `inputs`,
//! `environment`, and a mutable `output` object the script populates. There
//! is no host access of any kind; the only effects a script can have are
//! writes into values reachable from its own scope.

use serde_json::{Number, Value};
use std::collections::HashMap;

use super::parser::{BinaryOp, Expr, Stmt, UnaryOp};
use super::ScriptError;
use crate::capability::types::ValueMap;

struct Binding {
    value: Value,
    constant: bool,
}

enum Seg {
    Key(String),
    Num(usize),
}

pub struct Interpreter {
    scopes: Vec<HashMap<String, Binding>>,
}

/// Run a parsed program and return the populated `output` object.
pub fn evaluate(
    program: &[Stmt],
    inputs: &ValueMap,
    environment: &HashMap<String, Value>,
) -> Result<ValueMap, ScriptError> {
    let mut interpreter = Interpreter::new(inputs, environment);
    for statement in program {
        interpreter.exec(statement)?;
    }
    interpreter.into_output()
}

impl Interpreter {
    fn new(inputs: &ValueMap, environment: &HashMap<String, Value>) -> Self {
        let mut globals = HashMap::new();
        globals.insert(
            "inputs".to_string(),
            Binding {
                value: Value::Object(inputs.clone()),
                constant: true,
            },
        );
        let mut env_object = ValueMap::new();
        for (name, value) in environment {
            env_object.insert(name.clone(), value.clone());
        }
        globals.insert(
            "environment".to_string(),
            Binding {
                value: Value::Object(env_object),
                constant: true,
            },
        );
        globals.insert(
            "output".to_string(),
            Binding {
                value: Value::Object(ValueMap::new()),
                constant: true,
            },
        );
        Self {
            scopes: vec![globals],
        }
    }

    fn into_output(mut self) -> Result<ValueMap, ScriptError> {
        match self.scopes[0].remove("output") {
            Some(Binding {
                value: Value::Object(map),
                ..
            }) => Ok(map),
            _ => Err(ScriptError::new(
                "script replaced the output binding with a non-object".to_string(),
            )),
        }
    }

    fn exec(&mut self, statement: &Stmt) -> Result<(), ScriptError> {
        match statement {
            Stmt::Declare {
                name,
                value,
                constant,
            } => {
                let evaluated = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                let scope = self.scopes.last_mut().expect("scope stack is never empty");
                if scope.contains_key(name) {
                    return Err(ScriptError::new(format!(
                        "'{}' has already been declared",
                        name
                    )));
                }
                scope.insert(
                    name.clone(),
                    Binding {
                        value: evaluated,
                        constant: *constant,
                    },
                );
                Ok(())
            }
            Stmt::Assign { target, value } => {
                let evaluated = self.eval(value)?;
                self.assign(target, evaluated)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let branch = if truthy(&self.eval(condition)?) {
                    Some(then_branch)
                } else {
                    else_branch.as_ref()
                };
                if let Some(statements) = branch {
                    self.scopes.push(HashMap::new());
                    let result = statements.iter().try_for_each(|s| self.exec(s));
                    self.scopes.pop();
                    result?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
        }
    }

    fn assign(&mut self, target: &Expr, new_value: Value) -> Result<(), ScriptError> {
        let (root, segments) = self.collect_path(target)?;
        let binding = self.binding_mut(&root).ok_or_else(|| {
            ScriptError::new(format!("assignment to undeclared variable '{}'", root))
        })?;

        match segments.split_last() {
            None => {
                if binding.constant {
                    return Err(ScriptError::new(format!(
                        "assignment to constant '{}'",
                        root
                    )));
                }
                binding.value = new_value;
                Ok(())
            }
            // Mutating the contents of a bound object is allowed even for
            // constants; only rebinding is not.
            Some((last, head)) => {
                let mut current = &mut binding.value;
                for segment in head {
                    current = step_into(current, segment)?;
                }
                set_member(current, last, new_value)
            }
        }
    }

    fn collect_path(&self, target: &Expr) -> Result<(String, Vec<Seg>), ScriptError> {
        match target {
            Expr::Ident(name) => Ok((name.clone(), Vec::new())),
            Expr::Member(base, key) => {
                let (root, mut segments) = self.collect_path(base)?;
                segments.push(Seg::Key(key.clone()));
                Ok((root, segments))
            }
            Expr::Index(base, index) => {
                let (root, mut segments) = self.collect_path(base)?;
                match self.eval(index)? {
                    Value::String(key) => segments.push(Seg::Key(key)),
                    Value::Number(n) => {
                        let idx = n
                            .as_f64()
                            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                            .map(|f| f as usize)
                            .ok_or_else(|| {
                                ScriptError::new(format!("invalid index value {}", n))
                            })?;
                        segments.push(Seg::Num(idx));
                    }
                    other => {
                        return Err(ScriptError::new(format!(
                            "invalid index of type {}",
                            kind_of(&other)
                        )))
                    }
                }
                Ok((root, segments))
            }
            _ => Err(ScriptError::new("invalid assignment target".to_string())),
        }
    }

    fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                return Some(binding);
            }
        }
        None
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Ok(binding.value.clone());
            }
        }
        Err(ScriptError::new(format!("'{}' is not defined", name)))
    }

    fn eval(&self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Num(n) => number_value(*n),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Ident(name) => self.lookup(name),
            Expr::Member(base, name) => {
                let base_value = self.eval(base)?;
                member(&base_value, name)
            }
            Expr::Index(base, index) => {
                let base_value = self.eval(base)?;
                let index_value = self.eval(index)?;
                match (&base_value, &index_value) {
                    (Value::Object(map), Value::String(key)) => {
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Array(items), Value::Number(n)) => {
                        let idx = n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0);
                        Ok(idx
                            .and_then(|f| items.get(f as usize))
                            .cloned()
                            .unwrap_or(Value::Null))
                    }
                    _ => Err(ScriptError::new(format!(
                        "cannot index {} with {}",
                        kind_of(&base_value),
                        kind_of(&index_value)
                    ))),
                }
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => {
                        let n = value.as_f64().ok_or_else(|| {
                            ScriptError::new(format!("cannot negate {}", kind_of(&value)))
                        })?;
                        number_value(-n)
                    }
                }
            }
            Expr::Binary(op, left, right) => self.eval_binary(*op, left, right),
            Expr::Ternary(condition, then_value, else_value) => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then_value)
                } else {
                    self.eval(else_value)
                }
            }
            Expr::Object(entries) => {
                let mut map = ValueMap::new();
                for (key, value_expr) in entries {
                    map.insert(key.clone(), self.eval(value_expr)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, ScriptError> {
        // Short-circuit operators return the deciding operand.
        if op == BinaryOp::And {
            let l = self.eval(left)?;
            return if truthy(&l) { self.eval(right) } else { Ok(l) };
        }
        if op == BinaryOp::Or {
            let l = self.eval(left)?;
            return if truthy(&l) { Ok(l) } else { self.eval(right) };
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;
        match op {
            BinaryOp::Add => {
                if l.is_string() || r.is_string() {
                    return Ok(Value::String(format!("{}{}", display(&l), display(&r))));
                }
                let (a, b) = numeric_operands(&l, &r, "+")?;
                number_value(a + b)
            }
            BinaryOp::Sub => {
                let (a, b) = numeric_operands(&l, &r, "-")?;
                number_value(a - b)
            }
            BinaryOp::Mul => {
                let (a, b) = numeric_operands(&l, &r, "*")?;
                number_value(a * b)
            }
            BinaryOp::Div => {
                let (a, b) = numeric_operands(&l, &r, "/")?;
                number_value(a / b)
            }
            BinaryOp::Rem => {
                let (a, b) = numeric_operands(&l, &r, "%")?;
                number_value(a % b)
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let ordering = compare(&l, &r)?;
                let result = match op {
                    BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                    BinaryOp::LtEq => ordering != std::cmp::Ordering::Greater,
                    BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                    BinaryOp::GtEq => ordering != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

fn member(base: &Value, name: &str) -> Result<Value, ScriptError> {
    match base {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::Number(Number::from(items.len()))),
        Value::String(s) if name == "length" => {
            Ok(Value::Number(Number::from(s.chars().count())))
        }
        Value::Null => Err(ScriptError::new(format!(
            "cannot read property '{}' of null",
            name
        ))),
        other => Err(ScriptError::new(format!(
            "cannot read property '{}' of {}",
            name,
            kind_of(other)
        ))),
    }
}

fn step_into<'a>(value: &'a mut Value, segment: &Seg) -> Result<&'a mut Value, ScriptError> {
    match value {
        Value::Object(map) => {
            let key = match segment {
                Seg::Key(k) => k.clone(),
                Seg::Num(i) => i.to_string(),
            };
            map.get_mut(&key)
                .ok_or_else(|| ScriptError::new(format!("cannot set property of undefined '{}'", key)))
        }
        Value::Array(items) => match segment {
            Seg::Num(i) => {
                let len = items.len();
                items.get_mut(*i).ok_or_else(|| {
                    ScriptError::new(format!("index {} out of bounds (length {})", i, len))
                })
            }
            Seg::Key(k) => Err(ScriptError::new(format!(
                "cannot access property '{}' of an array",
                k
            ))),
        },
        other => Err(ScriptError::new(format!(
            "cannot set a property on {}",
            kind_of(other)
        ))),
    }
}

fn set_member(container: &mut Value, segment: &Seg, new_value: Value) -> Result<(), ScriptError> {
    match container {
        Value::Object(map) => {
            let key = match segment {
                Seg::Key(k) => k.clone(),
                Seg::Num(i) => i.to_string(),
            };
            map.insert(key, new_value);
            Ok(())
        }
        Value::Array(items) => match segment {
            Seg::Num(i) if *i < items.len() => {
                items[*i] = new_value;
                Ok(())
            }
            Seg::Num(i) if *i == items.len() => {
                items.push(new_value);
                Ok(())
            }
            Seg::Num(i) => Err(ScriptError::new(format!(
                "index {} out of bounds (length {})",
                i,
                items.len()
            ))),
            Seg::Key(k) => Err(ScriptError::new(format!(
                "cannot set property '{}' of an array",
                k
            ))),
        },
        other => Err(ScriptError::new(format!(
            "cannot set a property on {}",
            kind_of(other)
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // Numeric comparison is by value, so 1 == 1.0.
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ScriptError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).ok_or_else(|| {
                ScriptError::new("comparison of non-finite numbers".to_string())
            })
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ScriptError::new(format!(
            "cannot compare {} with {}",
            kind_of(a),
            kind_of(b)
        ))),
    }
}

fn numeric_operands(l: &Value, r: &Value, op: &str) -> Result<(f64, f64), ScriptError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ScriptError::new(format!(
            "unsupported operand types for '{}': {} and {}",
            op,
            kind_of(l),
            kind_of(r)
        ))),
    }
}

fn number_value(n: f64) -> Result<Value, ScriptError> {
    if !n.is_finite() {
        return Err(ScriptError::new(
            "arithmetic produced a non-finite number".to_string(),
        ));
    }
    if n.fract() == 0.0 && n.abs() < 9.0e18 {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::new("arithmetic produced a non-finite number".to_string()))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
