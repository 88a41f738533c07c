//! StubBackend: canned replies per backend, with every invocation recorded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mirage::{Backend, BackendError, InvocationKind, InvokeOptions};
use parking_lot::Mutex;
use serde_json::Value;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub backend: String,
    pub event: Value,
    pub kind: InvocationKind,
    pub request_id: String,
}

#[derive(Default)]
struct StubState {
    replies: HashMap<String, Result<Value, String>>,
    invocations: Vec<Invocation>,
}

/// A [`Backend`] answering from a table of canned replies.
///
/// Clones share state, so a test can keep one handle while the gateway owns
/// another. Backends without a reply fail with `no stub for backend '<name>'`.
#[derive(Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `backend` with `reply`.
    pub fn with_reply(self, backend: &str, reply: Value) -> Self {
        self.set_reply(backend, reply);
        self
    }

    /// Fail every call to `backend` with `message`.
    pub fn with_error(self, backend: &str, message: &str) -> Self {
        self.set_error(backend, message);
        self
    }

    pub fn set_reply(&self, backend: &str, reply: Value) {
        self.state.lock().replies.insert(backend.to_string(), Ok(reply));
    }

    pub fn set_error(&self, backend: &str, message: &str) {
        self.state
            .lock()
            .replies
            .insert(backend.to_string(), Err(message.to_string()));
    }

    /// All invocations so far, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    /// Invocations of one backend, oldest first.
    pub fn invocations_of(&self, backend: &str) -> Vec<Invocation> {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|i| i.backend == backend)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// This stub as the trait object a gateway takes.
    pub fn shared(&self) -> Arc<dyn Backend> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn invoke(
        &self,
        backend: &str,
        event: Value,
        options: InvokeOptions,
    ) -> Result<Value, BackendError> {
        let mut state = self.state.lock();
        state.invocations.push(Invocation {
            backend: backend.to_string(),
            event,
            kind: options.kind,
            request_id: options.request_id,
        });
        match state.replies.get(backend) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(message)) => Err(BackendError::new(message.clone())),
            None => Err(BackendError::new(format!("no stub for backend '{backend}'"))),
        }
    }
}
