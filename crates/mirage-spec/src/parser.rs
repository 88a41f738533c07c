use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::backend::parse_backend_name;
use crate::error::SpecError;
use crate::model::{
    ApiSpec, BodyProperty, BodySchema, HeaderValue, Integration, MethodKey, MethodSpec,
    ParameterDeclaration, ParameterLocation, PrimitiveType, ResponseDef, ResponseMap, Route,
    SecurityScheme,
};

/// HTTP methods we recognize in swagger paths.
const HTTP_METHODS: &[&str] = &[
    "get", "post", "put", "delete", "patch", "head", "options", "trace",
];

const ANY_METHOD: &str = "x-amazon-apigateway-any-method";
const INTEGRATION: &str = "x-amazon-apigateway-integration";
const RESPONSE_HEADER_PREFIX: &str = "method.response.header.";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Parse a resolved swagger document from a YAML/JSON string.
pub fn parse_spec(input: &str) -> Result<ApiSpec, SpecError> {
    // JSON is valid YAML
    let root: Value = serde_yaml::from_str(input).map_err(|e| SpecError::Parse(e.to_string()))?;
    parse_spec_value(&root)
}

/// Parse an in-memory resolved swagger document.
pub fn parse_spec_value(root: &Value) -> Result<ApiSpec, SpecError> {
    let root_obj = root
        .as_object()
        .ok_or_else(|| SpecError::Parse("spec root must be an object".into()))?;

    let base_path = root_obj
        .get("basePath")
        .and_then(|v| v.as_str())
        .map(|s| s.trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let security_definitions = parse_security_definitions(root_obj)?;
    let routes = parse_paths(root_obj, &security_definitions)?;

    Ok(ApiSpec {
        base_path,
        routes,
        security_definitions,
    })
}

fn parse_paths(
    root: &Map<String, Value>,
    security_definitions: &BTreeMap<String, SecurityScheme>,
) -> Result<Vec<Route>, SpecError> {
    let mut routes = Vec::new();

    let paths = match root.get("paths").and_then(|v| v.as_object()) {
        Some(p) => p,
        None => return Ok(routes),
    };

    for (path, path_item) in paths {
        let path_obj = path_item.as_object().ok_or_else(|| {
            SpecError::Document(format!("path item for '{}' must be an object", path))
        })?;

        let mut methods = Vec::new();
        let keys = HTTP_METHODS
            .iter()
            .map(|m| (*m, MethodKey::Verb(m.to_uppercase())))
            .chain(std::iter::once((ANY_METHOD, MethodKey::Any)));

        for (field, key) in keys {
            let Some(op_value) = path_obj.get(field) else {
                continue;
            };
            let op_error = |reason: String| SpecError::Operation {
                method: key.to_string(),
                path: path.clone(),
                reason,
            };
            let op_obj = op_value
                .as_object()
                .ok_or_else(|| op_error("operation must be an object".into()))?;

            // Methods without an integration are not served.
            let Some(integration) = op_obj.get(INTEGRATION) else {
                continue;
            };

            let mut parameters = parse_parameters(path_obj).map_err(&op_error)?;
            parameters.extend(parse_parameters(op_obj).map_err(&op_error)?);

            let integration = parse_integration(integration).map_err(|e| match e {
                IntegrationError::Reason(reason) => op_error(reason),
                IntegrationError::Spec(err) => err,
            })?;

            let security = match op_obj.get("security") {
                Some(requirements) => resolve_security(requirements, security_definitions)?,
                None => None,
            };

            methods.push(MethodSpec {
                key,
                parameters,
                integration,
                security,
            });
        }

        routes.push(Route {
            path: path.clone(),
            methods,
        });
    }

    Ok(routes)
}

fn parse_parameters(obj: &Map<String, Value>) -> Result<Vec<ParameterDeclaration>, String> {
    let Some(list) = obj.get("parameters") else {
        return Ok(Vec::new());
    };
    let list = list
        .as_array()
        .ok_or_else(|| "'parameters' must be an array".to_string())?;

    list.iter().map(parse_parameter).collect()
}

fn parse_parameter(value: &Value) -> Result<ParameterDeclaration, String> {
    let param = value
        .as_object()
        .ok_or_else(|| "parameter must be an object".to_string())?;
    let location = param.get("in").and_then(|v| v.as_str()).unwrap_or_default();

    let location = match location {
        "path" => ParameterLocation::Path,
        "header" => ParameterLocation::Header,
        "query" => ParameterLocation::Query,
        "body" => {
            let schema = param
                .get("schema")
                .and_then(|v| v.as_object())
                .ok_or_else(|| "Missing schema in body parameter".to_string())?;
            return parse_body_schema(schema).map(ParameterDeclaration::Body);
        }
        other => return Err(format!("Unknown parameter.in \"{}\"", other)),
    };

    let name = param
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("{} parameter without a name", location))?
        .to_string();

    // Swagger 2.0 puts `type` on the parameter; accept `schema.type` as well.
    let type_name = param.get("type").or_else(|| {
        param
            .get("schema")
            .and_then(|s| s.as_object())
            .and_then(|s| s.get("type"))
    });

    Ok(ParameterDeclaration::Named {
        location,
        name,
        ty: parse_type(type_name)?,
        required: param
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn parse_body_schema(schema: &Map<String, Value>) -> Result<BodySchema, String> {
    let Some(props) = schema.get("properties") else {
        return Ok(BodySchema::default());
    };
    let props = props
        .as_object()
        .ok_or_else(|| "body schema 'properties' must be an object".to_string())?;

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
        .unwrap_or_default();

    let mut properties = Vec::with_capacity(props.len());
    for (name, prop) in props {
        let prop = prop.as_object();
        let flagged = prop
            .and_then(|p| p.get("required"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        properties.push(BodyProperty {
            name: name.clone(),
            ty: parse_type(prop.and_then(|p| p.get("type")))?,
            required: flagged || required.contains(&name.as_str()),
        });
    }

    Ok(BodySchema {
        properties: Some(properties),
    })
}

fn parse_type(value: Option<&Value>) -> Result<Option<PrimitiveType>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => PrimitiveType::from_name(name)
            .map(Some)
            .ok_or_else(|| format!("Unknown type \"{}\"", name)),
        Some(other) => Err(format!("Unknown type {}", other)),
    }
}

enum IntegrationError {
    Reason(String),
    Spec(SpecError),
}

impl From<String> for IntegrationError {
    fn from(reason: String) -> Self {
        IntegrationError::Reason(reason)
    }
}

fn parse_integration(value: &Value) -> Result<Integration, IntegrationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("'{}' must be an object", INTEGRATION))?;
    let kind = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "integration without a type".to_string())?
        .to_ascii_lowercase();

    match kind.as_str() {
        "mock" => {
            let responses = parse_responses(obj.get("responses"))?;
            let body_template = mock_body_template(obj, responses.default.as_ref());
            Ok(Integration::Mock {
                responses,
                body_template,
            })
        }
        "aws" => Ok(Integration::Aws {
            backend: integration_backend(obj)?,
            request_templates: parse_templates(obj.get("requestTemplates"), "requestTemplates")?,
            responses: parse_responses(obj.get("responses"))?,
        }),
        "aws_proxy" => Ok(Integration::AwsProxy {
            backend: integration_backend(obj)?,
        }),
        other => Err(format!("Unsupported integration type \"{}\"", other).into()),
    }
}

fn integration_backend(obj: &Map<String, Value>) -> Result<String, IntegrationError> {
    let uri = obj
        .get("uri")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "integration without a uri".to_string())?;
    parse_backend_name(uri).map_err(IntegrationError::Spec)
}

fn mock_body_template(obj: &Map<String, Value>, default: Option<&ResponseDef>) -> String {
    if let Some(template) = obj.get("responseTemplate").and_then(|v| v.as_str()) {
        return template.to_string();
    }
    let Some(default) = default else {
        return String::new();
    };
    default
        .templates
        .get("")
        .or_else(|| default.templates.get(JSON_CONTENT_TYPE))
        .cloned()
        .unwrap_or_default()
}

/// `responseTemplate` on a response definition is stored under the empty
/// content type so the mock body lookup can prefer it.
fn parse_responses(value: Option<&Value>) -> Result<ResponseMap, String> {
    let mut map = ResponseMap::default();
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(map);
    };
    let responses = value
        .as_object()
        .ok_or_else(|| "'responses' must be an object".to_string())?;

    for (pattern, def) in responses {
        let def = parse_response_def(pattern, def)?;
        if pattern == "default" {
            map.default = Some(def);
        } else {
            map.patterns.push((pattern.clone(), def));
        }
    }
    Ok(map)
}

fn parse_response_def(pattern: &str, value: &Value) -> Result<ResponseDef, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("response \"{}\" must be an object", pattern))?;

    let status = match obj.get("statusCode") {
        None => 200,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| format!("response \"{}\" has invalid statusCode {}", pattern, n))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| format!("response \"{}\" has invalid statusCode \"{}\"", pattern, s))?,
        Some(other) => {
            return Err(format!(
                "response \"{}\" has invalid statusCode {}",
                pattern, other
            ))
        }
    };

    let mut headers = Vec::new();
    if let Some(params) = obj.get("responseParameters").and_then(|v| v.as_object()) {
        for (key, descriptor) in params {
            let Some(name) = key.strip_prefix(RESPONSE_HEADER_PREFIX) else {
                continue;
            };
            let descriptor = descriptor
                .as_str()
                .ok_or_else(|| format!("response parameter \"{}\" must be a string", key))?;
            let value = HeaderValue::parse(descriptor).map_err(|e| {
                format!(
                    "response parameter \"{}\" is not a literal, stage variable or JSON: {}",
                    key, e
                )
            })?;
            headers.push((name.to_string(), value));
        }
    }

    let mut templates =
        parse_templates(obj.get("responseTemplates"), "responseTemplates")?.unwrap_or_default();
    if let Some(template) = obj.get("responseTemplate").and_then(|v| v.as_str()) {
        templates.insert(String::new(), template.to_string());
    }

    Ok(ResponseDef {
        status,
        headers,
        templates,
    })
}

fn parse_templates(
    value: Option<&Value>,
    field: &str,
) -> Result<Option<BTreeMap<String, String>>, String> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let obj = value
        .as_object()
        .ok_or_else(|| format!("'{}' must be an object", field))?;

    let mut templates = BTreeMap::new();
    for (content_type, template) in obj {
        match template {
            Value::String(text) => {
                templates.insert(content_type.clone(), text.clone());
            }
            Value::Null => {}
            _ => return Err(format!("{}[\"{}\"] must be a string", field, content_type)),
        }
    }
    Ok(Some(templates))
}

fn parse_security_definitions(
    root: &Map<String, Value>,
) -> Result<BTreeMap<String, SecurityScheme>, SpecError> {
    let mut schemes = BTreeMap::new();
    let Some(definitions) = root.get("securityDefinitions").and_then(|v| v.as_object()) else {
        return Ok(schemes);
    };

    for (scheme, definition) in definitions {
        let reject = |reason: &str| SpecError::Security {
            scheme: scheme.clone(),
            reason: reason.to_string(),
        };
        let def = definition
            .as_object()
            .ok_or_else(|| reject("definition must be an object"))?;
        let field = |name: &str| def.get(name).and_then(|v| v.as_str());

        if field("type") != Some("apiKey") {
            return Err(reject("\"type\" must be \"apiKey\""));
        }
        if field("in") != Some("header") {
            return Err(reject("\"in\" must be \"header\""));
        }
        if field("x-amazon-apigateway-authtype") != Some("custom") {
            return Err(reject("\"x-amazon-apigateway-authtype\" must be \"custom\""));
        }
        let header = field("name")
            .ok_or_else(|| reject("missing \"name\""))?
            .to_string();
        let authorizer = def
            .get("x-amazon-apigateway-authorizer")
            .and_then(|v| v.as_object())
            .ok_or_else(|| reject("missing x-amazon-apigateway-authorizer"))?;
        if authorizer.get("type").and_then(|v| v.as_str()) != Some("token") {
            return Err(reject("authorizer \"type\" must be \"token\""));
        }
        let uri = authorizer
            .get("authorizerUri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| reject("missing authorizer \"authorizerUri\""))?;
        let backend = parse_backend_name(uri)?;

        let validation_pattern = authorizer
            .get("identityValidationExpression")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let ttl_seconds = match authorizer.get("authorizerResultTtlInSeconds") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .ok_or_else(|| reject("\"authorizerResultTtlInSeconds\" must be >= 0"))?,
            ),
            Some(Value::String(s)) => Some(
                s.parse()
                    .map_err(|_| reject("\"authorizerResultTtlInSeconds\" must be a number"))?,
            ),
            Some(_) => return Err(reject("\"authorizerResultTtlInSeconds\" must be a number")),
        };

        schemes.insert(
            scheme.clone(),
            SecurityScheme {
                name: scheme.clone(),
                header,
                validation_pattern,
                backend,
                ttl_seconds,
            },
        );
    }

    Ok(schemes)
}

/// Resolve `security: [{Scheme: []}]` to the first referenced scheme.
fn resolve_security(
    requirements: &Value,
    definitions: &BTreeMap<String, SecurityScheme>,
) -> Result<Option<SecurityScheme>, SpecError> {
    let Some(first) = requirements.as_array().and_then(|list| list.first()) else {
        return Ok(None);
    };
    let Some(name) = first.as_object().and_then(|o| o.keys().next()) else {
        return Ok(None);
    };
    definitions
        .get(name)
        .cloned()
        .map(Some)
        .ok_or_else(|| SpecError::Security {
            scheme: name.clone(),
            reason: "Unknown security definition".into(),
        })
}
