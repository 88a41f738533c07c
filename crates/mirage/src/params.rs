//! Parameter extraction and type coercion.
//!
//! A [`ParameterMapper`] is built once per method from its declarations and
//! turns each request into an [`Event`].

use mirage_spec::{BodyProperty, ParameterDeclaration, ParameterLocation, PrimitiveType};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::request::RequestParts;

/// A request that does not satisfy its method's declarations. Answered
/// with a 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    #[error("missing required {location} parameter '{name}'")]
    Missing { location: &'static str, name: String },

    #[error("{location} parameter '{name}' is not a number: '{value}'")]
    NotANumber {
        location: &'static str,
        name: String,
        value: String,
    },

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

const BODY: &str = "body";

/// The canonical backend event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    /// Path parameters.
    pub params: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
    pub payload: Value,
}

impl Event {
    /// `{ params, headers, query, payload }`
    pub fn to_value(&self) -> Value {
        let mut event = Map::new();
        event.insert("params".into(), Value::Object(self.params.clone()));
        event.insert("headers".into(), Value::Object(self.headers.clone()));
        event.insert("query".into(), Value::Object(self.query.clone()));
        event.insert("payload".into(), self.payload.clone());
        Value::Object(event)
    }

    /// Every mapped value under its own name, body fields at the top level.
    /// Used when an integration declares no request templates.
    pub fn flat(&self) -> Value {
        let mut event = Map::new();
        for bucket in [&self.params, &self.query, &self.headers] {
            for (name, value) in bucket {
                event.insert(name.clone(), value.clone());
            }
        }
        match &self.payload {
            Value::Object(fields) => {
                for (name, value) in fields {
                    event.insert(name.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => {
                event.insert("payload".into(), other.clone());
            }
        }
        Value::Object(event)
    }
}

#[derive(Debug, Clone)]
enum BodyMapping {
    /// No body declaration: the parsed payload is passed as is.
    Undeclared,
    /// A body schema without properties.
    Whole,
    AllowList(Vec<BodyProperty>),
}

#[derive(Debug, Clone)]
struct NamedParameter {
    location: ParameterLocation,
    name: String,
    ty: Option<PrimitiveType>,
    required: bool,
}

/// Maps requests to events for one method.
#[derive(Debug, Clone)]
pub struct ParameterMapper {
    named: Vec<NamedParameter>,
    body: BodyMapping,
}

impl ParameterMapper {
    pub fn new(declarations: &[ParameterDeclaration]) -> Self {
        let mut named = Vec::new();
        let mut body = BodyMapping::Undeclared;
        for declaration in declarations {
            match declaration {
                ParameterDeclaration::Named {
                    location,
                    name,
                    ty,
                    required,
                } => named.push(NamedParameter {
                    location: *location,
                    name: name.clone(),
                    ty: *ty,
                    required: *required,
                }),
                ParameterDeclaration::Body(schema) => {
                    body = match &schema.properties {
                        None => BodyMapping::Whole,
                        Some(properties) => BodyMapping::AllowList(properties.clone()),
                    };
                }
            }
        }
        Self { named, body }
    }

    pub fn map(&self, request: &RequestParts) -> Result<Event, InvalidRequest> {
        let payload = parse_payload(request)?;
        let mut event = Event::default();

        for param in &self.named {
            let raw = match param.location {
                ParameterLocation::Path => request.path_params.get(&param.name).cloned(),
                ParameterLocation::Query => request.query_value(&param.name).map(str::to_string),
                ParameterLocation::Header => request.header(&param.name),
            };
            let location = param.location.as_str();
            let Some(raw) = raw else {
                if param.required {
                    return Err(InvalidRequest::Missing {
                        location,
                        name: param.name.clone(),
                    });
                }
                continue;
            };
            let value = coerce(param.ty, Value::String(raw), location, &param.name)?;
            let bucket = match param.location {
                ParameterLocation::Path => &mut event.params,
                ParameterLocation::Query => &mut event.query,
                ParameterLocation::Header => &mut event.headers,
            };
            bucket.insert(param.name.clone(), value);
        }

        event.payload = match &self.body {
            BodyMapping::Undeclared | BodyMapping::Whole => payload,
            BodyMapping::AllowList(properties) => {
                let mut mapped = Map::new();
                for property in properties {
                    match payload.get(&property.name) {
                        Some(value) => {
                            let value = coerce(property.ty, value.clone(), BODY, &property.name)?;
                            mapped.insert(property.name.clone(), value);
                        }
                        None if property.required => {
                            return Err(InvalidRequest::Missing {
                                location: BODY,
                                name: property.name.clone(),
                            })
                        }
                        None => {}
                    }
                }
                Value::Object(mapped)
            }
        };

        Ok(event)
    }
}

/// Parse the body per the request content type: JSON (empty is `{}`) or a
/// URL-encoded form.
pub fn parse_payload(request: &RequestParts) -> Result<Value, InvalidRequest> {
    if request.is_json() {
        if request.body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        return serde_json::from_str(&request.body)
            .map_err(|e| InvalidRequest::MalformedBody(e.to_string()));
    }
    Ok(parse_form(&request.body))
}

/// Repeated keys collect into an array.
fn parse_form(body: &str) -> Value {
    let mut form = Map::new();
    for (key, value) in form_urlencoded::parse(body.as_bytes()) {
        let value = Value::String(value.into_owned());
        match form.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                form.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(form)
}

/// Coerce a string source to its declared type. Other JSON values pass
/// through unchanged.
fn coerce(
    ty: Option<PrimitiveType>,
    value: Value,
    location: &'static str,
    name: &str,
) -> Result<Value, InvalidRequest> {
    let Value::String(text) = value else {
        return Ok(value);
    };
    match ty {
        Some(PrimitiveType::Number) => parse_number(&text)
            .map(Value::Number)
            .ok_or_else(|| InvalidRequest::NotANumber {
                location,
                name: name.to_string(),
                value: text.clone(),
            }),
        Some(PrimitiveType::Boolean) => Ok(Value::Bool(!text.is_empty())),
        _ => Ok(Value::String(text)),
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}
