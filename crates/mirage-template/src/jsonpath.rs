//! JSON-path subset used by `$input.json()` and `$input.path()`.
//!
//! Supported: `$`, `.name`, `['name']`, `[n]` (negative counts from the
//! end), `[*]`, `.*` and `..name` (recursive descent).

use serde_json::Value;

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
}

fn invalid(path: &str, reason: &str) -> TemplateError {
    TemplateError::Render(format!("invalid JSON path \"{}\": {}", path, reason))
}

fn parse(path: &str) -> Result<Vec<Step>, TemplateError> {
    let mut rest = path.trim();
    rest = rest.strip_prefix('$').unwrap_or(rest);
    let mut steps = Vec::new();
    // A path without `$` starts with a member name.
    if !rest.is_empty() && !rest.starts_with(['.', '[']) {
        let (name, tail) = split_name(rest);
        steps.push(Step::Child(name.to_string()));
        rest = tail;
    }

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("..") {
            if let Some(tail) = tail.strip_prefix('*') {
                steps.push(Step::Descendant("*".into()));
                rest = tail;
                continue;
            }
            let (name, tail) = split_name(tail);
            if name.is_empty() {
                return Err(invalid(path, "expected a name after '..'"));
            }
            steps.push(Step::Descendant(name.to_string()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('.') {
            if let Some(tail) = tail.strip_prefix('*') {
                steps.push(Step::Wildcard);
                rest = tail;
                continue;
            }
            let (name, tail) = split_name(tail);
            if name.is_empty() {
                return Err(invalid(path, "expected a name after '.'"));
            }
            steps.push(Step::Child(name.to_string()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('[') {
            let close = tail
                .find(']')
                .ok_or_else(|| invalid(path, "unclosed '['"))?;
            let inner = tail[..close].trim();
            rest = &tail[close + 1..];
            if inner == "*" {
                steps.push(Step::Wildcard);
            } else if let Some(name) = quoted(inner) {
                steps.push(Step::Child(name.to_string()));
            } else {
                let index = inner
                    .parse()
                    .map_err(|_| invalid(path, "unsupported subscript"))?;
                steps.push(Step::Index(index));
            }
        } else {
            return Err(invalid(path, "unexpected character"));
        }
    }
    Ok(steps)
}

fn split_name(text: &str) -> (&str, &str) {
    let end = text.find(['.', '[']).unwrap_or(text.len());
    (&text[..end], &text[end..])
}

fn quoted(text: &str) -> Option<&str> {
    ['\'', '"'].iter().find_map(|q| {
        text.strip_prefix(*q)
            .and_then(|t| t.strip_suffix(*q))
    })
}

fn children(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    }
}

fn descendants<'v>(value: &'v Value, name: &str, out: &mut Vec<&'v Value>) {
    if let Value::Object(map) = value {
        if name == "*" {
            out.extend(map.values());
        } else if let Some(found) = map.get(name) {
            out.push(found);
        }
    } else if name == "*" {
        out.extend(children(value));
    }
    for child in children(value) {
        descendants(child, name, out);
    }
}

/// Every value matched by `path`, in document order.
pub fn query<'v>(root: &'v Value, path: &str) -> Result<Vec<&'v Value>, TemplateError> {
    let mut current = vec![root];
    for step in parse(path)? {
        let mut next = Vec::new();
        for value in current {
            match &step {
                Step::Child(name) => {
                    if let Some(found) = value.as_object().and_then(|m| m.get(name)) {
                        next.push(found);
                    }
                }
                Step::Index(index) => {
                    if let Value::Array(items) = value {
                        let len = items.len() as i64;
                        let resolved = if *index < 0 { len + index } else { *index };
                        if let Some(found) = usize::try_from(resolved).ok().and_then(|i| items.get(i)) {
                            next.push(found);
                        }
                    }
                }
                Step::Wildcard => next.extend(children(value)),
                Step::Descendant(name) => descendants(value, name, &mut next),
            }
        }
        current = next;
    }
    Ok(current)
}

/// The first value matched by `path`, if any.
pub fn first<'v>(root: &'v Value, path: &str) -> Result<Option<&'v Value>, TemplateError> {
    Ok(query(root, path)?.into_iter().next())
}
