use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;
use mirage_router::RouteError;
use mirage_spec::SpecError;
use mirage_template::TemplateError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::response::message_response;

/// A problem found while building the gateway from a spec. Fatal at
/// start-up.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("[{method} {path}] {reason}")]
    Method {
        method: String,
        path: String,
        reason: String,
    },

    #[error("invalid route '{path}': {source}")]
    Route { path: String, source: RouteError },

    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// A per-request failure inside the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("template failure: {0}")]
    Template(#[from] TemplateError),

    #[error("rendered event is not valid JSON: {0}")]
    EventJson(String),

    #[error("no response definition for outcome")]
    MissingResponse,

    #[error("backend failure: {0}")]
    Backend(BackendError),

    #[error("invalid proxy reply: {0}")]
    ProxyReply(String),

    #[error("request handler panicked")]
    Panic,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ProxyReply(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client-facing response. Causes are never exposed.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let key = match self {
            GatewayError::Backend(_) | GatewayError::ProxyReply(_) | GatewayError::Panic => "message",
            _ => "errorMessage",
        };
        message_response(self.status(), key, "Internal server error")
    }
}
