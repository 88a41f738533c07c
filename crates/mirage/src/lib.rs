//! Mirage: a local emulator of a swagger-driven cloud API gateway.
//!
//! A [`Gateway`] is built from a resolved swagger document carrying
//! `x-amazon-apigateway-integration` extensions. Each request is routed,
//! optionally authorized by a custom token authorizer, and then handled by
//! its method's integration:
//!
//! - `mock`: a rendered literal body, no backend call;
//! - `aws`: parameters are mapped, a request template renders the backend
//!   event and the reply is mapped back through the integration responses;
//! - `aws_proxy`: the whole request is sent as a proxy envelope and the
//!   backend reply is the HTTP response.
//!
//! Backends are reached through the [`Backend`] trait; the gateway never
//! runs backend code itself.

pub mod auth;
pub mod backend;
pub mod config;
mod dispatch;
pub mod error;
pub mod params;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use auth::{AuthCache, Authorizer, AuthorizerDecision, Rejection};
pub use backend::{Backend, BackendError, FnBackend, InvocationKind, InvokeOptions};
pub use config::{ConfigError, GatewayConfig};
pub use error::{BuildError, GatewayError};
pub use params::{Event, InvalidRequest, ParameterMapper};
pub use response::ResponseSelector;
pub use server::Gateway;

pub use mirage_spec::{parse_spec, ApiSpec};
pub use mirage_telemetry::{LogFormat, TelemetryError};
