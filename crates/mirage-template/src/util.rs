//! `$util` functions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::error::TemplateError;

/// Escape a string for embedding inside a JavaScript/JSON string literal.
pub fn escape_javascript(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

pub fn parse_json(text: &str) -> Result<Value, TemplateError> {
    serde_json::from_str(text)
        .map_err(|e| TemplateError::Render(format!("$util.parseJson: {}", e)))
}

pub fn url_encode(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

pub fn url_decode(text: &str) -> Result<String, TemplateError> {
    urlencoding::decode(text)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| TemplateError::Render(format!("$util.urlDecode: {}", e)))
}

pub fn base64_encode(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn base64_decode(text: &str) -> Result<String, TemplateError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| TemplateError::Render(format!("$util.base64Decode: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Dispatch `$util.<name>(arg)`. Unknown functions yield `None`.
pub(crate) fn call(name: &str, arg: &str) -> Option<Result<Value, TemplateError>> {
    let result = match name {
        "escapeJavaScript" => Ok(Value::String(escape_javascript(arg))),
        "parseJson" => parse_json(arg),
        "urlEncode" => Ok(Value::String(url_encode(arg))),
        "urlDecode" => url_decode(arg).map(Value::String),
        "base64Encode" => Ok(Value::String(base64_encode(arg))),
        "base64Decode" => base64_decode(arg).map(Value::String),
        _ => return None,
    };
    Some(result)
}
