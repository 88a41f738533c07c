//! Integration response selection and HTTP response assembly.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue as HttpHeaderValue, Response, StatusCode};
use http_body_util::Full;
use mirage_spec::{HeaderValue, ResponseDef, ResponseMap};
use regex::Regex;
use serde_json::{json, Value};

use crate::request::JSON_MEDIA_TYPE;

/// A JSON response with the given status.
pub fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HttpHeaderValue::from_static(JSON_MEDIA_TYPE));
    response
}

/// `{"<key>": "<message>"}` with the given status.
pub fn message_response(status: StatusCode, key: &str, message: &str) -> Response<Full<Bytes>> {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), Value::String(message.to_string()));
    json_response(status, Value::Object(body).to_string())
}

/// A response definition with its status and headers resolved.
#[derive(Debug, Clone)]
pub struct PreparedResponse {
    status: StatusCode,
    headers: HeaderMap,
    templates: BTreeMap<String, String>,
}

impl PreparedResponse {
    /// Resolve `def` against the deployment's stage variables.
    pub fn prepare(
        def: &ResponseDef,
        stage_variables: &BTreeMap<String, String>,
    ) -> Result<Self, String> {
        let status = StatusCode::from_u16(def.status)
            .map_err(|_| format!("invalid response status code {}", def.status))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HttpHeaderValue::from_static(JSON_MEDIA_TYPE));
        for (name, descriptor) in &def.headers {
            let text = match descriptor {
                HeaderValue::Literal(text) => text.clone(),
                HeaderValue::StageVariable(variable) => match stage_variables.get(variable) {
                    Some(value) => value.clone(),
                    None => {
                        tracing::warn!(
                            header = %name,
                            stage_variable = %variable,
                            "stage variable is not defined, header omitted"
                        );
                        continue;
                    }
                },
                HeaderValue::Json(Value::String(text)) => text.clone(),
                HeaderValue::Json(other) => other.to_string(),
            };
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid response header name '{name}'"))?;
            let header_value = HttpHeaderValue::from_str(&text)
                .map_err(|_| format!("invalid value for response header '{name}'"))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            status,
            headers,
            templates: def.templates.clone(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response template for a content type.
    pub fn template(&self, content_type: &str) -> Option<&str> {
        self.templates.get(content_type).map(String::as_str)
    }

    pub fn respond(&self, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Picks a response definition from a backend outcome.
#[derive(Debug, Clone)]
pub struct ResponseSelector {
    patterns: Vec<(Regex, PreparedResponse)>,
    default: Option<PreparedResponse>,
}

impl ResponseSelector {
    pub fn new(
        responses: &ResponseMap,
        stage_variables: &BTreeMap<String, String>,
    ) -> Result<Self, String> {
        let mut patterns = Vec::with_capacity(responses.patterns.len());
        for (pattern, def) in &responses.patterns {
            let regex = Regex::new(pattern)
                .map_err(|e| format!("invalid response pattern '{pattern}': {e}"))?;
            patterns.push((regex, PreparedResponse::prepare(def, stage_variables)?));
        }
        let default = responses
            .default
            .as_ref()
            .map(|def| PreparedResponse::prepare(def, stage_variables))
            .transpose()?;
        Ok(Self { patterns, default })
    }

    pub fn default_response(&self) -> Option<&PreparedResponse> {
        self.default.as_ref()
    }

    /// `None` selects for success. An error message is searched by each
    /// pattern in declaration order; the first hit wins, else `default`.
    pub fn select(&self, error: Option<&str>) -> Option<&PreparedResponse> {
        if let Some(message) = error {
            if let Some((_, response)) = self
                .patterns
                .iter()
                .find(|(regex, _)| regex.is_match(message))
            {
                return Some(response);
            }
        }
        self.default.as_ref()
    }
}

/// The data a response template sees after a backend failure.
pub fn error_data(message: &str) -> Value {
    json!({ "errorMessage": message })
}
