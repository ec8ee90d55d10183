use std::collections::{BTreeMap, HashMap};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::program::{BinOp, Diagnostics, Expression, TemplatePart, UnaryOp};
use crate::value::{MarkSet, Value, ValueKind};

pub mod builtins;

pub use builtins::Builtins;

/// The variable bindings of a run. Bindings appear as their producing node
/// completes and are never rewritten.
#[derive(Default)]
pub struct Scope {
    variables: HashMap<String, Value>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Append a binding. Rebinding an existing name is a programmer error.
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> Result<(), Diagnostics> {
        let name = name.into();
        if self.variables.contains_key(&name) {
            return Err(Diagnostics::error(format!(
                "variable '{}' is already bound",
                name
            )));
        }
        self.variables.insert(name, value);
        Ok(())
    }
}

/// The expression evaluator. One mutex guards all reads and writes of the
/// context: a top-level evaluation holds it for its whole duration, so
/// concurrent evaluations are serialized. Parallelism comes from resource
/// RPCs, not from expression evaluation.
pub struct Evaluator {
    scope: Mutex<Scope>,
    functions: Builtins,
}

impl Evaluator {
    pub fn new(functions: Builtins) -> Self {
        Evaluator {
            scope: Mutex::new(Scope::default()),
            functions,
        }
    }

    /// Evaluate one top-level expression under the evaluation lock.
    pub async fn eval(&self, expr: &Expression) -> Result<Value, Diagnostics> {
        let scope = self.scope.lock().await;
        eval_expr(expr, &scope, &self.functions).await
    }

    /// Bind a variable. Acquires the lock independently of evaluation.
    pub async fn define(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), Diagnostics> {
        let mut scope = self.scope.lock().await;
        scope.define(name, value)
    }

    pub async fn lookup(&self, name: &str) -> Option<Value> {
        let scope = self.scope.lock().await;
        scope.get(name).cloned()
    }
}

/// Evaluate an expression against a scope. Boxed so evaluation can recurse
/// through async built-ins.
pub(crate) fn eval_expr<'a>(
    expr: &'a Expression,
    scope: &'a Scope,
    functions: &'a Builtins,
) -> BoxFuture<'a, Result<Value, Diagnostics>> {
    Box::pin(async move {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),

            Expression::Variable(name) => scope.get(name).cloned().ok_or_else(|| {
                Diagnostics::error(format!("undefined variable '{}'", name))
            }),

            Expression::GetAttr { object, name } => {
                let object = eval_expr(object, scope, functions).await?;
                if object.is_unknown() {
                    return Ok(Value::unknown().with_marks(&object.marks));
                }
                match object.get(name) {
                    Some(value) => Ok(value.clone().with_marks(&object.marks)),
                    None => Err(Diagnostics::error(format!(
                        "value has no attribute '{}'",
                        name
                    ))),
                }
            }

            Expression::Index { collection, key } => {
                let collection = eval_expr(collection, scope, functions).await?;
                let key = eval_expr(key, scope, functions).await?;
                let mut marks = collection.marks.clone();
                marks.extend(key.marks.iter().cloned());
                if collection.is_unknown() || key.is_unknown() {
                    return Ok(Value::unknown().with_marks(&marks));
                }
                if let (Some(items), Some(index)) = (collection.as_sequence(), key.as_number()) {
                    let index = index as usize;
                    return items
                        .get(index)
                        .map(|v| v.clone().with_marks(&marks))
                        .ok_or_else(|| {
                            Diagnostics::error(format!("index {} out of bounds", index))
                        });
                }
                if let (Some(entries), Some(name)) = (collection.as_entries(), key.as_str()) {
                    return entries
                        .get(name)
                        .map(|v| v.clone().with_marks(&marks))
                        .ok_or_else(|| Diagnostics::error(format!("no such key '{}'", name)));
                }
                Err(Diagnostics::error("value cannot be indexed"))
            }

            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut marks = MarkSet::new();
                for item in items {
                    let value = eval_expr(item, scope, functions).await?;
                    marks.extend(value.marks.iter().cloned());
                    values.push(value);
                }
                Ok(Value::sequence(values).with_marks(&marks))
            }

            Expression::Object(entries) => {
                let mut values = BTreeMap::new();
                let mut marks = MarkSet::new();
                for (key, entry) in entries {
                    let value = eval_expr(entry, scope, functions).await?;
                    marks.extend(value.marks.iter().cloned());
                    values.insert(key.clone(), value);
                }
                Ok(Value::object(values).with_marks(&marks))
            }

            Expression::Template(parts) => {
                let mut rendered = String::new();
                let mut marks = MarkSet::new();
                let mut unknown = false;
                for part in parts {
                    match part {
                        TemplatePart::Literal(text) => rendered.push_str(text),
                        TemplatePart::Interpolation(expr) => {
                            let value = eval_expr(expr, scope, functions).await?;
                            marks.extend(value.marks.iter().cloned());
                            match &value.kind {
                                ValueKind::Unknown => unknown = true,
                                ValueKind::Null => {}
                                ValueKind::String(s) => rendered.push_str(s),
                                ValueKind::Number(n) => rendered.push_str(&n.to_string()),
                                ValueKind::Bool(b) => rendered.push_str(&b.to_string()),
                                _ => {
                                    return Err(Diagnostics::error(
                                        "only primitive values can be interpolated",
                                    ))
                                }
                            }
                        }
                    }
                }
                if unknown {
                    Ok(Value::unknown().with_marks(&marks))
                } else {
                    Ok(Value::string(rendered).with_marks(&marks))
                }
            }

            Expression::Call { name, args } => functions.call(name, args, scope).await,

            Expression::Conditional {
                condition,
                true_val,
                false_val,
            } => {
                let condition = eval_expr(condition, scope, functions).await?;
                if condition.is_unknown() {
                    return Ok(Value::unknown().with_marks(&condition.marks));
                }
                let taken = match condition.as_bool() {
                    Some(true) => true_val,
                    Some(false) => false_val,
                    None => {
                        return Err(Diagnostics::error("condition must be a boolean"));
                    }
                };
                let value = eval_expr(taken, scope, functions).await?;
                Ok(value.with_marks(&condition.marks))
            }

            Expression::BinaryOp { op, left, right } => {
                let left = eval_expr(left, scope, functions).await?;
                let right = eval_expr(right, scope, functions).await?;
                let mut marks = left.marks.clone();
                marks.extend(right.marks.iter().cloned());
                if left.is_unknown() || right.is_unknown() {
                    return Ok(Value::unknown().with_marks(&marks));
                }
                let result = apply_binary(*op, &left, &right)?;
                Ok(result.with_marks(&marks))
            }

            Expression::UnaryOp { op, operand } => {
                let operand = eval_expr(operand, scope, functions).await?;
                if operand.is_unknown() {
                    return Ok(operand);
                }
                let marks = operand.marks.clone();
                let result = match op {
                    UnaryOp::Neg => Value::number(
                        -operand
                            .as_number()
                            .ok_or_else(|| Diagnostics::error("operand must be a number"))?,
                    ),
                    UnaryOp::Not => Value::bool(
                        !operand
                            .as_bool()
                            .ok_or_else(|| Diagnostics::error("operand must be a boolean"))?,
                    ),
                };
                Ok(result.with_marks(&marks))
            }
        }
    })
}

fn apply_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, Diagnostics> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div | Mod | Lt | Lte | Gt | Gte => {
            let (a, b) = match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(Diagnostics::error("operands must be numbers")),
            };
            Ok(match op {
                Add => Value::number(a + b),
                Sub => Value::number(a - b),
                Mul => Value::number(a * b),
                Div => Value::number(a / b),
                Mod => Value::number(a % b),
                Lt => Value::bool(a < b),
                Lte => Value::bool(a <= b),
                Gt => Value::bool(a > b),
                Gte => Value::bool(a >= b),
                _ => unreachable!(),
            })
        }
        Eq => Ok(Value::bool(left.kind == right.kind)),
        NotEq => Ok(Value::bool(left.kind != right.kind)),
        And | Or => {
            let (a, b) = match (left.as_bool(), right.as_bool()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(Diagnostics::error("operands must be booleans")),
            };
            Ok(Value::bool(if op == And { a && b } else { a || b }))
        }
    }
}
