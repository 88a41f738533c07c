//! Backend identifier extraction from integration URIs.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SpecError;

const GROUP_REGION: &str = r"([a-z0-9\-]+)";
const GROUP_VERSION: &str = r"(\d{4}-\d{2}-\d{2})";
const GROUP_ACCOUNT: &str = r"(\d+)";
const GROUP_PREFIX: &str = r"([^_]+)";
const GROUP_NAME: &str = r"([^:/]+)";

fn backend_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let gateway = format!("arn:aws:apigateway:{GROUP_REGION}:lambda:path/{GROUP_VERSION}");
        let function = format!(
            "arn:aws:lambda:{GROUP_REGION}:{GROUP_ACCOUNT}:function:{GROUP_PREFIX}_{GROUP_NAME}"
        );
        Regex::new(&format!("^{gateway}/functions/{function}"))
            .expect("backend URI pattern is a valid regex")
    })
}

/// Resolve the backend identifier addressed by an integration URI.
///
/// The identifier is the function name with its `<prefix>_` stripped, so
/// `...:function:studio_some-lambda:current/invocations` names `some-lambda`.
pub fn parse_backend_name(uri: &str) -> Result<String, SpecError> {
    backend_uri_pattern()
        .captures(uri)
        .and_then(|captures| captures.get(6))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SpecError::BackendUri(uri.to_string()))
}
