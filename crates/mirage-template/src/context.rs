use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// The three parameter buckets exposed through `$input.params()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub path: Map<String, Value>,
    pub querystring: Map<String, Value>,
    pub headers: Map<String, Value>,
}

impl Params {
    /// First value defined for `name`, checked path, then query, then header.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.path
            .get(name)
            .or_else(|| self.querystring.get(name))
            .or_else(|| self.headers.get(name))
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut all = Map::new();
        all.insert("path".into(), Value::Object(self.path.clone()));
        all.insert("querystring".into(), Value::Object(self.querystring.clone()));
        all.insert("headers".into(), Value::Object(self.headers.clone()));
        Value::Object(all)
    }
}

/// Backing data of the `$input` variable.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    pub params: &'a Params,
    /// Parsed payload queried by `$input.json()` and `$input.path()`.
    pub payload: &'a Value,
    /// `$input.body`, the raw body text.
    pub body: &'a str,
}

/// Everything a template can see while rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// `$context`
    pub context: &'a Value,
    pub input: Input<'a>,
    /// `$stageVariables`
    pub stage_variables: &'a BTreeMap<String, String>,
}
