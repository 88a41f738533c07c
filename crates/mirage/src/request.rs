//! The parts of an HTTP request the processors work from.

use http::HeaderMap;
use mirage_router::PathParams;
use mirage_template::Params;
use serde_json::{Map, Value};

/// Media type assumed when a request carries no `Content-Type`.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// A routed request with its body fully read.
#[derive(Debug, Clone)]
pub struct RequestParts {
    /// Uppercase HTTP verb.
    pub method: String,
    /// The request path as received, base path included.
    pub path: String,
    /// The matched route template, e.g. `/items/{id}`.
    pub resource: String,
    /// Percent-decoded placeholder values.
    pub path_params: PathParams,
    /// Query pairs in request order, percent-decoded.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: String,
    pub request_id: String,
}

impl RequestParts {
    /// A header value by case-insensitive name. The last value wins when the
    /// header is repeated.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(name)
            .iter()
            .last()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    }

    /// First query value for `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The request media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        let media = content_type.split(';').next().unwrap_or_default().trim();
        if media.is_empty() {
            None
        } else {
            Some(media.to_ascii_lowercase())
        }
    }

    /// Whether the body is JSON. Anything else, including a missing content
    /// type, is treated as a URL-encoded form.
    pub fn is_json(&self) -> bool {
        self.media_type()
            .is_some_and(|media| media == JSON_MEDIA_TYPE || media.ends_with("+json"))
    }

    /// The `$input.params()` buckets: every path, query and header value of
    /// the request, unfiltered by declarations.
    pub fn template_params(&self) -> Params {
        let path = self
            .path_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut querystring = Map::new();
        for (key, value) in &self.query {
            if !querystring.contains_key(key) {
                querystring.insert(key.clone(), Value::String(value.clone()));
            }
        }

        let mut headers = Map::new();
        for name in self.headers.keys() {
            if let Some(value) = self.header(name.as_str()) {
                headers.insert(name.as_str().to_string(), Value::String(value));
            }
        }

        Params {
            path,
            querystring,
            headers,
        }
    }
}

/// Split a raw query string into decoded pairs.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}
