//! The backend invocation channel.
//!
//! The gateway never runs backend code itself; it hands an event to a
//! [`Backend`] and waits for the reply.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A backend reported failure. The message is what response patterns are
/// matched against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Why the gateway is invoking a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// Template-mapped integration; any JSON reply.
    Integration,
    /// Proxy integration; the reply must be a proxy response object.
    Proxy,
    /// Token authorizer; the reply must carry a policy document.
    Authorizer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    pub request_id: String,
    pub kind: InvocationKind,
}

/// Executes backend functions on behalf of the gateway.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn invoke(
        &self,
        backend: &str,
        event: Value,
        options: InvokeOptions,
    ) -> Result<Value, BackendError>;
}

/// Adapts an async closure into a [`Backend`].
pub struct FnBackend<F> {
    handler: F,
}

impl<F> FnBackend<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Backend for FnBackend<F>
where
    F: Fn(String, Value, InvokeOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BackendError>> + Send + 'static,
{
    async fn invoke(
        &self,
        backend: &str,
        event: Value,
        options: InvokeOptions,
    ) -> Result<Value, BackendError> {
        (self.handler)(backend.to_string(), event, options).await
    }
}

/// Run an invocation on its own task so an abandoned request does not
/// cancel it; the result is then simply dropped.
pub(crate) async fn invoke_detached(
    backend: &Arc<dyn Backend>,
    name: &str,
    event: Value,
    options: InvokeOptions,
) -> Result<Value, BackendError> {
    let backend = Arc::clone(backend);
    let name = name.to_string();
    let task = tokio::spawn(async move { backend.invoke(&name, event, options).await });
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(BackendError::new("backend invocation panicked")),
        Err(_) => Err(BackendError::new("backend invocation was cancelled")),
    }
}
