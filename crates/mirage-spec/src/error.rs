use thiserror::Error;

/// Errors produced while reading a resolved spec (E2001–E2005).
#[derive(Debug, Error)]
pub enum SpecError {
    /// E2001: YAML/JSON parse error.
    #[error("E2001: parse error: {0}")]
    Parse(String),

    /// E2002: The document does not have the expected shape.
    #[error("E2002: invalid document: {0}")]
    Document(String),

    /// E2003: A single operation is malformed.
    #[error("E2003: [{method} {path}] {reason}")]
    Operation {
        method: String,
        path: String,
        reason: String,
    },

    /// E2004: An integration or authorizer URI does not name a backend.
    #[error("E2004: unexpected integration format \"{0}\"")]
    BackendUri(String),

    /// E2005: A security definition is unknown or unsupported.
    #[error("E2005: security definition \"{scheme}\": {reason}")]
    Security { scheme: String, reason: String },
}
