//! Pass-through proxy integration: the request envelope sent to the backend
//! and the translation of its reply.

use base64::Engine;
use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde_json::{Map, Value};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::request::RequestParts;

/// `x-foo-bar` becomes `X-Foo-Bar`. Only lowercase letters at the start or
/// after a `-` change.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if upper_next && c.is_ascii_lowercase() {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper_next = c == '-';
    }
    out
}

fn string_map<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> (Map<String, Value>, Map<String, Value>) {
    let mut single = Map::new();
    let mut multi: Map<String, Value> = Map::new();
    for (name, value) in pairs {
        single.insert(name.to_string(), Value::String(value.clone()));
        match multi.get_mut(name) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            _ => {
                multi.insert(name.to_string(), Value::Array(vec![Value::String(value)]));
            }
        }
    }
    (single, multi)
}

fn object_or_null(map: Map<String, Value>) -> Value {
    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

/// Build the proxy request envelope.
pub fn build_envelope(
    request: &RequestParts,
    config: &GatewayConfig,
    authorizer: Option<&Value>,
) -> Value {
    let header_pairs: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| {
            (
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let (headers, multi_headers) =
        string_map(header_pairs.iter().map(|(k, v)| (k.as_str(), v.clone())));

    // The single-value map keeps the first query value.
    let (mut query, multi_query) =
        string_map(request.query.iter().map(|(k, v)| (k.as_str(), v.clone())));
    for (name, values) in &multi_query {
        if let Some(first) = values.as_array().and_then(|v| v.first()) {
            query.insert(name.clone(), first.clone());
        }
    }

    let path_parameters: Map<String, Value> = request
        .path_params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let stage_variables: Map<String, Value> = config
        .stage_variables
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut request_context = Map::new();
    request_context.insert("accountId".into(), Value::String(config.account_id.clone()));
    request_context.insert("resourceId".into(), Value::Null);
    request_context.insert("stage".into(), Value::String(config.stage.clone()));
    request_context.insert("requestId".into(), Value::String(request.request_id.clone()));
    request_context.insert("identity".into(), Value::Object(Map::new()));
    request_context.insert("resourcePath".into(), Value::String(request.resource.clone()));
    request_context.insert("httpMethod".into(), Value::String(request.method.clone()));
    request_context.insert("apiId".into(), Value::Null);
    request_context.insert("authorizer".into(), authorizer.cloned().unwrap_or(Value::Null));

    let mut envelope = Map::new();
    envelope.insert("resource".into(), Value::String(request.resource.clone()));
    envelope.insert("path".into(), Value::String(request.path.clone()));
    envelope.insert("httpMethod".into(), Value::String(request.method.clone()));
    envelope.insert("headers".into(), Value::Object(headers));
    envelope.insert("multiValueHeaders".into(), Value::Object(multi_headers));
    envelope.insert("pathParameters".into(), object_or_null(path_parameters));
    envelope.insert("queryStringParameters".into(), object_or_null(query));
    envelope.insert("multiValueQueryStringParameters".into(), object_or_null(multi_query));
    envelope.insert("stageVariables".into(), Value::Object(stage_variables));
    envelope.insert("requestContext".into(), Value::Object(request_context));
    envelope.insert("body".into(), Value::String(request.body.clone()));
    envelope.insert("isBase64Encoded".into(), Value::Bool(false));
    Value::Object(envelope)
}

fn header_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

fn reply_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), GatewayError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| GatewayError::ProxyReply(format!("invalid header name '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| GatewayError::ProxyReply(format!("invalid value for header '{name}'")))?;
    Ok((header_name, header_value))
}

/// Translate a backend proxy reply into the HTTP response.
pub fn parse_reply(reply: &Value) -> Result<Response<Full<Bytes>>, GatewayError> {
    let Some(reply) = reply.as_object() else {
        return Err(GatewayError::ProxyReply("reply is not an object".into()));
    };

    let status = reply
        .get("statusCode")
        .and_then(status_code)
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| GatewayError::ProxyReply("statusCode must be a valid HTTP status".into()))?;

    let Some(Value::String(body)) = reply.get("body") else {
        return Err(GatewayError::ProxyReply("body must be a string".into()));
    };

    let body = if reply.get("isBase64Encoded").and_then(Value::as_bool) == Some(true) {
        Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(body)
                .map_err(|e| GatewayError::ProxyReply(format!("body is not valid base64: {e}")))?,
        )
    } else {
        Bytes::from(body.clone())
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();

    if let Some(Value::Object(single)) = reply.get("headers") {
        for (name, value) in single {
            if let Some(text) = header_text(value) {
                let (name, value) = reply_header(name, &text)?;
                headers.insert(name, value);
            }
        }
    }
    if let Some(Value::Object(multi)) = reply.get("multiValueHeaders") {
        for (name, values) in multi {
            let Some(values) = values.as_array() else {
                continue;
            };
            let mut first = true;
            for text in values.iter().filter_map(header_text) {
                let (name, value) = reply_header(name, &text)?;
                if first {
                    headers.insert(name, value);
                    first = false;
                } else {
                    headers.append(name, value);
                }
            }
        }
    }

    Ok(response)
}

/// A numeric status, integral floats such as `201.0` included.
fn status_code(value: &Value) -> Option<u16> {
    if let Some(code) = value.as_u64() {
        return u16::try_from(code).ok();
    }
    let code = value.as_f64()?;
    if code.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&code) {
        Some(code as u16)
    } else {
        None
    }
}
