//! Template evaluation.
//!
//! Values are `serde_json::Value`s. `null` doubles as "undefined": it renders
//! as empty text, is falsy, and any property or method applied to it yields
//! `null` again.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::ast::{BinaryOp, Expr, Node, Reference, Segment, UnaryOp};
use crate::context::RenderContext;
use crate::error::TemplateError;
use crate::{jsonpath, util};

/// Largest number of elements a `[a..b]` range may produce.
const MAX_RANGE_LEN: u64 = 10_000;

pub(crate) struct Renderer<'r, 'a> {
    ctx: &'r RenderContext<'a>,
    locals: HashMap<String, Value>,
}

impl<'r, 'a> Renderer<'r, 'a> {
    pub(crate) fn new(ctx: &'r RenderContext<'a>) -> Self {
        Renderer {
            ctx,
            locals: HashMap::new(),
        }
    }

    pub(crate) fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Reference(reference) => {
                    let value = self.resolve(reference)?;
                    write_text(&value, out);
                }
                Node::Set { target, value } => {
                    let value = self.eval(value)?;
                    self.assign(target, value);
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (condition, body) in branches {
                        if truthy(&self.eval(condition)?) {
                            self.render(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if let (false, Some(body)) = (taken, otherwise) {
                        self.render(body, out)?;
                    }
                }
                Node::Foreach {
                    variable,
                    iterable,
                    body,
                } => {
                    let items = match self.eval(iterable)? {
                        Value::Array(items) => items,
                        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                        _ => Vec::new(),
                    };
                    let saved_item = self.locals.remove(variable);
                    let saved_loop = self.locals.remove("foreach");
                    let total = items.len();
                    for (index, item) in items.into_iter().enumerate() {
                        let mut state = Map::new();
                        state.insert("index".into(), Value::from(index));
                        state.insert("count".into(), Value::from(index + 1));
                        state.insert("hasNext".into(), Value::Bool(index + 1 < total));
                        state.insert("first".into(), Value::Bool(index == 0));
                        state.insert("last".into(), Value::Bool(index + 1 == total));
                        self.locals.insert("foreach".into(), Value::Object(state));
                        self.locals.insert(variable.clone(), item);
                        self.render(body, out)?;
                    }
                    self.restore(variable, saved_item);
                    self.restore("foreach", saved_loop);
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, name: &str, saved: Option<Value>) {
        match saved {
            Some(value) => {
                self.locals.insert(name.to_string(), value);
            }
            None => {
                self.locals.remove(name);
            }
        }
    }

    fn assign(&mut self, target: &Reference, value: Value) {
        let Some((last, parents)) = target.segments.split_last() else {
            self.locals.insert(target.root.clone(), value);
            return;
        };
        let Some(mut slot) = self.locals.get_mut(&target.root) else {
            return;
        };
        for segment in parents {
            let Segment::Property(name) = segment else {
                return;
            };
            let Some(next) = slot.as_object_mut().and_then(|m| m.get_mut(name)) else {
                return;
            };
            slot = next;
        }
        if let (Segment::Property(name), Some(map)) = (last, slot.as_object_mut()) {
            map.insert(name.clone(), value);
        }
    }

    fn resolve(&mut self, reference: &Reference) -> Result<Value, TemplateError> {
        let ctx = self.ctx;
        let mut segments = reference.segments.as_slice();

        let start: Cow<'r, Value> = if let Some(local) = self.locals.get(&reference.root) {
            Cow::Owned(local.clone())
        } else {
            match reference.root.as_str() {
                "context" => Cow::Borrowed(ctx.context),
                "stageVariables" => Cow::Owned(Value::Object(
                    ctx.stage_variables
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                )),
                "input" | "util" => {
                    let Some((first, rest)) = segments.split_first() else {
                        return Ok(Value::Null);
                    };
                    segments = rest;
                    let value = if reference.root == "input" {
                        self.input_member(first)?
                    } else {
                        self.util_member(first)?
                    };
                    Cow::Owned(value)
                }
                _ => return Ok(Value::Null),
            }
        };

        let mut current = start;
        for segment in segments {
            current = match segment {
                Segment::Property(name) => match current {
                    Cow::Borrowed(value) => value
                        .get(name.as_str())
                        .map(Cow::Borrowed)
                        .unwrap_or(Cow::Owned(Value::Null)),
                    Cow::Owned(value) => Cow::Owned(property(value, name)),
                },
                Segment::Index(index) => {
                    let index = self.eval(index)?;
                    Cow::Owned(index_value(&current, &index))
                }
                Segment::Method { name, args } => {
                    let args = self.eval_all(args)?;
                    Cow::Owned(call_method(&current, name, &args))
                }
            };
            if current.is_null() {
                return Ok(Value::Null);
            }
        }
        Ok(current.into_owned())
    }

    fn input_member(&mut self, segment: &Segment) -> Result<Value, TemplateError> {
        let input = self.ctx.input;
        match segment {
            Segment::Property(name) if name == "body" => Ok(Value::String(input.body.to_string())),
            Segment::Method { name, args } => {
                let args = self.eval_all(args)?;
                let arg = args.first().map(to_text);
                match (name.as_str(), arg) {
                    ("params", None) => Ok(input.params.to_value()),
                    ("params", Some(name)) => {
                        Ok(input.params.lookup(&name).cloned().unwrap_or(Value::Null))
                    }
                    ("json", Some(path)) => Ok(jsonpath::first(input.payload, &path)?
                        .map(|v| Value::String(v.to_string()))
                        .unwrap_or(Value::Null)),
                    ("path", Some(path)) => Ok(jsonpath::first(input.payload, &path)?
                        .cloned()
                        .unwrap_or(Value::Null)),
                    _ => Ok(Value::Null),
                }
            }
            _ => Ok(Value::Null),
        }
    }

    fn util_member(&mut self, segment: &Segment) -> Result<Value, TemplateError> {
        let Segment::Method { name, args } = segment else {
            return Ok(Value::Null);
        };
        let args = self.eval_all(args)?;
        let arg = args.first().map(to_text).unwrap_or_default();
        util::call(name, &arg).unwrap_or(Ok(Value::Null))
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        Ok(match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Interpolated(nodes) => {
                let mut text = String::new();
                self.render(nodes, &mut text)?;
                Value::String(text)
            }
            Expr::Reference(reference) => self.resolve(reference)?,
            Expr::List(items) => Value::Array(self.eval_all(items)?),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = to_text(&self.eval(key)?);
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Value::Object(map)
            }
            Expr::Range(from, to) => {
                match (self.eval(from)?.as_i64(), self.eval(to)?.as_i64()) {
                    (Some(from), Some(to)) if from.abs_diff(to) >= MAX_RANGE_LEN => {
                        return Err(TemplateError::Render(format!(
                            "range [{from}..{to}] exceeds {MAX_RANGE_LEN} elements"
                        )));
                    }
                    (Some(from), Some(to)) if from <= to => (from..=to).map(Value::from).collect(),
                    (Some(from), Some(to)) => (to..=from).rev().map(Value::from).collect(),
                    _ => Value::Null,
                }
            }
            Expr::Unary(UnaryOp::Not, operand) => Value::Bool(!truthy(&self.eval(operand)?)),
            Expr::Unary(UnaryOp::Neg, operand) => match number(&self.eval(operand)?) {
                Some(Num::Int(n)) => n.checked_neg().map(Value::from).unwrap_or(Value::Null),
                Some(Num::Float(f)) => Value::from(-f),
                None => Value::Null,
            },
            Expr::Binary(BinaryOp::And, left, right) => {
                Value::Bool(truthy(&self.eval(left)?) && truthy(&self.eval(right)?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                Value::Bool(truthy(&self.eval(left)?) || truthy(&self.eval(right)?))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
        })
    }
}

fn property(value: Value, name: &str) -> Value {
    match value {
        Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_value(value: &Value, index: &Value) -> Value {
    match (value, index) {
        (Value::Array(items), index) => index
            .as_i64()
            .and_then(|i| {
                let i = if i < 0 { items.len() as i64 + i } else { i };
                usize::try_from(i).ok()
            })
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), key) => map.get(&to_text(key)).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

static NULL: Value = Value::Null;

fn call_method(value: &Value, name: &str, args: &[Value]) -> Value {
    let arg = |i: usize| args.get(i).unwrap_or(&NULL);
    let text_arg = |i: usize| to_text(arg(i));

    match (value, name) {
        (Value::Array(items), "size" | "length") => Value::from(items.len()),
        (Value::Object(map), "size") => Value::from(map.len()),
        (Value::String(s), "size" | "length") => Value::from(s.chars().count()),

        (Value::Array(items), "isEmpty") => Value::Bool(items.is_empty()),
        (Value::Object(map), "isEmpty") => Value::Bool(map.is_empty()),
        (Value::String(s), "isEmpty") => Value::Bool(s.is_empty()),

        (Value::Object(map), "get") => map.get(&text_arg(0)).cloned().unwrap_or(Value::Null),
        (Value::Array(_), "get") => index_value(value, arg(0)),
        (Value::Object(map), "containsKey") => Value::Bool(map.contains_key(&text_arg(0))),
        (Value::Object(map), "keySet") => {
            Value::Array(map.keys().cloned().map(Value::String).collect())
        }

        (Value::String(s), "contains") => Value::Bool(s.contains(&text_arg(0))),
        (Value::Array(items), "contains") => {
            Value::Bool(items.iter().any(|item| loose_eq(item, arg(0))))
        }
        (Value::String(s), "indexOf") => Value::from(
            s.find(&text_arg(0))
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1),
        ),
        (Value::Array(items), "indexOf") => Value::from(
            items
                .iter()
                .position(|item| loose_eq(item, arg(0)))
                .map(|i| i as i64)
                .unwrap_or(-1),
        ),

        (_, "toString") => Value::String(to_text(value)),
        (Value::String(s), "toLowerCase") => Value::String(s.to_lowercase()),
        (Value::String(s), "toUpperCase") => Value::String(s.to_uppercase()),
        (Value::String(s), "trim") => Value::String(s.trim().to_string()),
        (Value::String(s), "startsWith") => Value::Bool(s.starts_with(&text_arg(0))),
        (Value::String(s), "endsWith") => Value::Bool(s.ends_with(&text_arg(0))),
        (Value::String(s), "replace") => Value::String(s.replace(&text_arg(0), &text_arg(1))),
        (Value::String(s), "substring") => substring(s, arg(0), args.get(1)),

        _ => Value::Null,
    }
}

fn substring(text: &str, start: &Value, end: Option<&Value>) -> Value {
    let chars: Vec<char> = text.chars().collect();
    let Some(start) = start.as_u64().map(|n| n as usize) else {
        return Value::Null;
    };
    let end = match end {
        Some(end) => match end.as_u64() {
            Some(n) => n as usize,
            None => return Value::Null,
        },
        None => chars.len(),
    };
    if start > end || end > chars.len() {
        return Value::Null;
    }
    Value::String(chars[start..end].iter().collect())
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn number(value: &Value) -> Option<Num> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64()
        .map(Num::Int)
        .or_else(|| n.as_f64().map(Num::Float))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Value::String(format!("{}{}", to_text(left), to_text(right)))
        }
        _ => arithmetic(op, left, right).unwrap_or(Value::Null),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    let (left, right) = (number(left)?, number(right)?);
    if let (Num::Int(a), Num::Int(b)) = (left, right) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result.map(Value::from);
    }
    let (a, b) = (left.as_f64(), right.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b != 0.0 => a / b,
        BinaryOp::Rem if b != 0.0 => a % b,
        _ => return None,
    };
    serde_json::Number::from_f64(result).map(Value::Number)
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (number(left), number(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ if std::mem::discriminant(left) == std::mem::discriminant(right) => left == right,
        // Differently typed values compare by their text, nulls never match.
        _ if left.is_null() || right.is_null() => false,
        _ => to_text(left) == to_text(right),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (number(left), number(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
        (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Render a value the way a template prints it.
pub fn to_text(value: &Value) -> String {
    let mut out = String::new();
    write_text(value, &mut out);
    out
}

fn write_text(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_text(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push('=');
                write_text(item, out);
            }
            out.push('}');
        }
    }
}
