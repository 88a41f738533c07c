use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resolved API specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSpec {
    /// The `basePath` field, if it is anything other than `/`.
    pub base_path: Option<String>,
    /// Routes in declaration order.
    pub routes: Vec<Route>,
    /// Parsed `securityDefinitions`, keyed by scheme name.
    pub security_definitions: BTreeMap<String, SecurityScheme>,
}

/// A path template with the methods declared on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// The path template (e.g. "/items/{id}").
    pub path: String,
    /// Methods with an integration, in declaration order.
    pub methods: Vec<MethodSpec>,
}

/// The key a method is declared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKey {
    /// An HTTP verb, uppercase.
    Verb(String),
    /// `x-amazon-apigateway-any-method`.
    Any,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKey::Verb(verb) => f.write_str(verb),
            MethodKey::Any => f.write_str("ANY"),
        }
    }
}

/// A single operation (route + verb).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub key: MethodKey,
    /// Path-level parameters followed by operation-level ones.
    pub parameters: Vec<ParameterDeclaration>,
    pub integration: Integration,
    /// The resolved security scheme guarding this method.
    pub security: Option<SecurityScheme>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Header,
    Query,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Header => "header",
            ParameterLocation::Query => "query",
        }
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared primitive type of a parameter or body property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl PrimitiveType {
    /// Map a swagger type name. `integer` is folded into `Number`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(PrimitiveType::String),
            "number" | "integer" => Some(PrimitiveType::Number),
            "boolean" => Some(PrimitiveType::Boolean),
            "object" => Some(PrimitiveType::Object),
            "array" => Some(PrimitiveType::Array),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterDeclaration {
    Named {
        location: ParameterLocation,
        name: String,
        #[serde(rename = "type")]
        ty: Option<PrimitiveType>,
        required: bool,
    },
    Body(BodySchema),
}

/// Schema of an `in: body` parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodySchema {
    /// `None` passes the whole payload through; `Some` is an allow-list.
    pub properties: Option<Vec<BodyProperty>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<PrimitiveType>,
    pub required: bool,
}

/// Backend binding of one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Integration {
    Mock {
        responses: ResponseMap,
        body_template: String,
    },
    Aws {
        backend: String,
        /// Content type to template text. `None` when `requestTemplates` is absent.
        request_templates: Option<BTreeMap<String, String>>,
        responses: ResponseMap,
    },
    AwsProxy {
        backend: String,
    },
}

impl Integration {
    pub fn kind(&self) -> &'static str {
        match self {
            Integration::Mock { .. } => "mock",
            Integration::Aws { .. } => "aws",
            Integration::AwsProxy { .. } => "aws_proxy",
        }
    }
}

/// Integration responses: pattern-keyed definitions plus the `default` one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMap {
    /// Non-default entries in declaration order; keys are regular expressions.
    pub patterns: Vec<(String, ResponseDef)>,
    pub default: Option<ResponseDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDef {
    pub status: u16,
    /// Header name to value descriptor, in declaration order.
    pub headers: Vec<(String, HeaderValue)>,
    /// Content type to response template text.
    pub templates: BTreeMap<String, String>,
}

/// A response header value descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HeaderValue {
    /// `'text'`, quotes stripped.
    Literal(String),
    /// `stageVariables.<name>`.
    StageVariable(String),
    /// Anything else, parsed as JSON.
    Json(Value),
}

impl HeaderValue {
    /// Classify a `responseParameters` descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, serde_json::Error> {
        if let Some(name) = descriptor.strip_prefix("stageVariables.") {
            return Ok(HeaderValue::StageVariable(name.to_string()));
        }
        if descriptor.len() >= 2 && descriptor.starts_with('\'') && descriptor.ends_with('\'') {
            return Ok(HeaderValue::Literal(
                descriptor[1..descriptor.len() - 1].to_string(),
            ));
        }
        serde_json::from_str(descriptor).map(HeaderValue::Json)
    }
}

/// A custom token authorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityScheme {
    pub name: String,
    /// Header carrying the token.
    pub header: String,
    /// `identityValidationExpression`.
    pub validation_pattern: Option<String>,
    /// Authorizer backend identifier.
    pub backend: String,
    /// `authorizerResultTtlInSeconds`.
    pub ttl_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_descriptor_forms() {
        assert_eq!(
            HeaderValue::parse("'*'").unwrap(),
            HeaderValue::Literal("*".into())
        );
        assert_eq!(
            HeaderValue::parse("stageVariables.env").unwrap(),
            HeaderValue::StageVariable("env".into())
        );
        assert_eq!(
            HeaderValue::parse("\"text\"").unwrap(),
            HeaderValue::Json(json!("text"))
        );
        assert_eq!(HeaderValue::parse("42").unwrap(), HeaderValue::Json(json!(42)));
        assert!(HeaderValue::parse("integration.response.body").is_err());
    }

    #[test]
    fn integer_is_a_number() {
        assert_eq!(PrimitiveType::from_name("integer"), Some(PrimitiveType::Number));
        assert_eq!(PrimitiveType::from_name("file"), None);
    }

    #[test]
    fn method_key_display() {
        assert_eq!(MethodKey::Verb("GET".into()).to_string(), "GET");
        assert_eq!(MethodKey::Any.to_string(), "ANY");
    }
}
