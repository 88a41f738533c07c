//! Structured logging setup, event names and logging macros.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter, TestWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Install a global fmt subscriber for `config`.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(fmt_layer(config).with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn fmt_layer(config: &TelemetryConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let writer = if config.test_writer {
        BoxMakeWriter::new(TestWriter::default())
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let layer = fmt::layer().with_writer(writer).with_target(true);
    match config.log_format {
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => layer.pretty().with_file(true).with_line_number(true).boxed(),
    }
}

/// Standard log event names.
pub mod events {
    /// Gateway built its handlers from a spec.
    pub const STARTUP: &str = "startup";

    /// Gateway is accepting connections.
    pub const LISTENING: &str = "listening";

    /// A request has been answered.
    pub const REQUEST_COMPLETED: &str = "request_completed";

    /// A request failed parameter mapping and got a 400.
    pub const INVALID_REQUEST: &str = "invalid_request";

    /// A token authorizer denied the request.
    pub const AUTHORIZER_REJECTED: &str = "authorizer_rejected";

    /// A mapping template failed to compile or render.
    pub const TEMPLATE_FAILURE: &str = "template_failure";

    /// Invoking a backend failed, or its reply was unusable.
    pub const DISPATCH_ERROR: &str = "dispatch_error";
}

#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_COMPLETED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_invalid_request {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::INVALID_REQUEST,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_authorizer_rejected {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::AUTHORIZER_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_template_failure {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::TEMPLATE_FAILURE,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_dispatch_error {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::DISPATCH_ERROR,
            $($field)*
        )
    };
}
