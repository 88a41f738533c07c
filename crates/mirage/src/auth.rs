//! Custom token authorizers and their decision cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;
use mirage_spec::SecurityScheme;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::backend::{invoke_detached, Backend, InvocationKind, InvokeOptions};
use crate::request::RequestParts;
use crate::response::message_response;

/// An accepted authorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizerDecision {
    pub principal_id: Option<String>,
    /// Context values, all strings.
    pub context: Map<String, Value>,
}

impl AuthorizerDecision {
    /// Accept `reply` if its policy holds exactly one `Allow` statement.
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let statements = reply.get("policyDocument")?.get("Statement")?;
        let statement = match statements {
            Value::Array(list) if list.len() == 1 => &list[0],
            Value::Object(_) => statements,
            _ => return None,
        };
        if statement.get("Effect").and_then(Value::as_str) != Some("Allow") {
            return None;
        }

        let principal_id = reply.get("principalId").and_then(|id| match id {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        let mut context = Map::new();
        if let Some(Value::Object(entries)) = reply.get("context") {
            for (key, value) in entries {
                let text = match value {
                    Value::String(text) => text.clone(),
                    Value::Object(_) | Value::Array(_) => {
                        tracing::warn!(key = %key, "authorizer context value is not a scalar, dropped");
                        continue;
                    }
                    scalar => scalar.to_string(),
                };
                context.insert(key.clone(), Value::String(text));
            }
        }

        Some(Self {
            principal_id,
            context,
        })
    }

    /// The `authorizer` object seen by templates and proxy envelopes.
    pub fn to_context_value(&self) -> Value {
        let mut value = Map::new();
        value.insert(
            "principalId".into(),
            self.principal_id.clone().map_or(Value::Null, Value::String),
        );
        for (key, entry) in &self.context {
            value.insert(key.clone(), entry.clone());
        }
        Value::Object(value)
    }
}

/// Why a request was not authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Token missing or failing the validation pattern.
    Unauthorized,
    /// The authorizer backend failed with this message.
    BackendFailed(String),
    /// The policy did not allow the request.
    Denied,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Denied => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let message = match self {
            Rejection::Unauthorized => "Unauthorized",
            Rejection::BackendFailed(message) => message.as_str(),
            Rejection::Denied => "User is not authorized to access this resource",
        };
        message_response(self.status(), "message", message)
    }
}

type CacheKey = (String, String);

struct CacheEntry {
    decision: Arc<AuthorizerDecision>,
    /// `None` when the ttl is too large to represent.
    expires_at: Option<Instant>,
    generation: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    generation: AtomicU64,
}

/// Accepted decisions by (scheme, token), each with an absolute expiry.
///
/// An entry is removed either on the first read after it expired or by the
/// eviction task scheduled at insertion, whichever runs first. The task only
/// removes the entry it was scheduled for, identified by its generation.
#[derive(Clone, Default)]
pub struct AuthCache {
    inner: Arc<CacheInner>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scheme: &str, token: &str) -> Option<Arc<AuthorizerDecision>> {
        let key = (scheme.to_string(), token.to_string());
        let mut entries = self.inner.entries.lock();
        let entry = entries.get(&key)?;
        if entry.expires_at.is_some_and(|at| Instant::now() >= at) {
            entries.remove(&key);
            return None;
        }
        Some(Arc::clone(&entry.decision))
    }

    /// Store a decision for `ttl` and schedule its eviction. Must be called
    /// within a tokio runtime.
    pub fn insert(&self, scheme: &str, token: &str, decision: Arc<AuthorizerDecision>, ttl: Duration) {
        let key = (scheme.to_string(), token.to_string());
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now().checked_add(ttl);
        self.inner.entries.lock().insert(
            key.clone(),
            CacheEntry {
                decision,
                expires_at,
                generation,
            },
        );

        let Some(expires_at) = expires_at else {
            return;
        };
        let inner: Weak<CacheInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut entries = inner.entries.lock();
            if entries.get(&key).is_some_and(|entry| entry.generation == generation) {
                entries.remove(&key);
            }
        });
    }

    /// Number of stored entries, expired ones not yet removed included.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A token authorizer guarding one method.
#[derive(Debug, Clone)]
pub struct Authorizer {
    scheme: String,
    header: String,
    pattern: Option<Regex>,
    backend: String,
    ttl: Duration,
}

impl Authorizer {
    pub fn new(scheme: &SecurityScheme) -> Result<Self, String> {
        let pattern = scheme
            .validation_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("security scheme '{}' has an invalid validation pattern: {e}", scheme.name))?;
        Ok(Self {
            scheme: scheme.name.clone(),
            header: scheme.header.clone(),
            pattern,
            backend: scheme.backend.clone(),
            ttl: Duration::from_secs(scheme.ttl_seconds.unwrap_or(0)),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub async fn authorize(
        &self,
        request: &RequestParts,
        backend: &Arc<dyn Backend>,
        cache: &AuthCache,
    ) -> Result<Arc<AuthorizerDecision>, Rejection> {
        let token = request.header(&self.header);

        if let Some(pattern) = &self.pattern {
            match token.as_deref() {
                Some(token) if pattern.is_match(token) => {}
                _ => return Err(self.reject(Rejection::Unauthorized)),
            }
        }

        if let Some(token) = token.as_deref() {
            if let Some(decision) = cache.get(&self.scheme, token) {
                tracing::debug!(scheme = %self.scheme, "authorizer cache hit");
                return Ok(decision);
            }
        }

        let event = json!({ "authorizationToken": token });
        let options = InvokeOptions {
            request_id: request.request_id.clone(),
            kind: InvocationKind::Authorizer,
        };
        let reply = invoke_detached(backend, &self.backend, event, options)
            .await
            .map_err(|e| self.reject(Rejection::BackendFailed(e.message)))?;

        let decision = AuthorizerDecision::from_reply(&reply)
            .map(Arc::new)
            .ok_or_else(|| self.reject(Rejection::Denied))?;

        if let Some(token) = token.as_deref() {
            if !self.ttl.is_zero() {
                cache.insert(&self.scheme, token, Arc::clone(&decision), self.ttl);
            }
        }
        Ok(decision)
    }

    fn reject(&self, rejection: Rejection) -> Rejection {
        mirage_telemetry::log_authorizer_rejected!(
            scheme = %self.scheme,
            status = rejection.status().as_u16(),
            "request not authorized"
        );
        rejection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, FnBackend};
    use crate::request::tests::request;
    use std::sync::atomic::AtomicUsize;

    fn allow(principal: &str) -> Value {
        json!({
            "principalId": principal,
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [{ "Action": "execute-api:Invoke", "Effect": "Allow", "Resource": "*" }]
            },
            "context": { "user": "alice", "count": 3, "admin": true, "nested": { "a": 1 } }
        })
    }

    fn scheme(pattern: Option<&str>, ttl: Option<u64>) -> SecurityScheme {
        SecurityScheme {
            name: "tokenAuth".into(),
            header: "Authorization".into(),
            validation_pattern: pattern.map(str::to_string),
            backend: "authorizer".into(),
            ttl_seconds: ttl,
        }
    }

    fn counting_backend(reply: Result<Value, BackendError>) -> (Arc<dyn Backend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend = FnBackend::new(move |name: String, event: Value, options: InvokeOptions| {
            let reply = reply.clone();
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(name, "authorizer");
                assert_eq!(options.kind, InvocationKind::Authorizer);
                assert!(event.get("authorizationToken").is_some());
                reply
            }
        });
        (Arc::new(backend), calls)
    }

    #[test]
    fn decision_requires_single_allow_statement() {
        assert!(AuthorizerDecision::from_reply(&allow("u")).is_some());

        let single_object = json!({ "policyDocument": { "Statement": { "Effect": "Allow" } } });
        assert!(AuthorizerDecision::from_reply(&single_object).is_some());

        let deny = json!({ "policyDocument": { "Statement": [{ "Effect": "Deny" }] } });
        assert!(AuthorizerDecision::from_reply(&deny).is_none());

        let two = json!({ "policyDocument": { "Statement": [{ "Effect": "Allow" }, { "Effect": "Allow" }] } });
        assert!(AuthorizerDecision::from_reply(&two).is_none());

        assert!(AuthorizerDecision::from_reply(&json!({})).is_none());
    }

    #[test]
    fn context_values_become_strings() {
        let decision = AuthorizerDecision::from_reply(&allow("u")).unwrap();
        assert_eq!(decision.principal_id.as_deref(), Some("u"));
        assert_eq!(
            decision.to_context_value(),
            json!({ "principalId": "u", "user": "alice", "count": "3", "admin": "true" })
        );
    }

    #[tokio::test]
    async fn pattern_mismatch_is_unauthorized_without_invocation() {
        let (backend, calls) = counting_backend(Ok(allow("u")));
        let authorizer = Authorizer::new(&scheme(Some("^Bearer "), None)).unwrap();
        let cache = AuthCache::new();

        let req = request("GET", &[("authorization", "Basic x")], "");
        let err = authorizer.authorize(&req, &backend, &cache).await.unwrap_err();
        assert_eq!(err, Rejection::Unauthorized);

        let req = request("GET", &[], "");
        let err = authorizer.authorize(&req, &backend, &cache).await.unwrap_err();
        assert_eq!(err, Rejection::Unauthorized);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backend_failure_message_is_returned() {
        let (backend, _) = counting_backend(Err(BackendError::new("token expired")));
        let authorizer = Authorizer::new(&scheme(None, None)).unwrap();
        let req = request("GET", &[("authorization", "t")], "");
        let err = authorizer.authorize(&req, &backend, &AuthCache::new()).await.unwrap_err();
        assert_eq!(err, Rejection::BackendFailed("token expired".into()));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deny_is_forbidden() {
        let deny = json!({ "policyDocument": { "Statement": [{ "Effect": "Deny" }] } });
        let (backend, _) = counting_backend(Ok(deny));
        let authorizer = Authorizer::new(&scheme(None, Some(300))).unwrap();
        let cache = AuthCache::new();
        let req = request("GET", &[("authorization", "t")], "");
        let err = authorizer.authorize(&req, &backend, &cache).await.unwrap_err();
        assert_eq!(err, Rejection::Denied);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn missing_token_without_pattern_invokes_with_null() {
        let backend: Arc<dyn Backend> = Arc::new(FnBackend::new(
            |_: String, event: Value, _: InvokeOptions| async move {
                assert_eq!(event, json!({ "authorizationToken": null }));
                Ok::<_, BackendError>(allow("anonymous"))
            },
        ));
        let authorizer = Authorizer::new(&scheme(None, Some(300))).unwrap();
        let cache = AuthCache::new();
        let decision = authorizer
            .authorize(&request("GET", &[], ""), &backend, &cache)
            .await
            .unwrap();
        assert_eq!(decision.principal_id.as_deref(), Some("anonymous"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_decisions_are_cached_for_ttl() {
        let (backend, calls) = counting_backend(Ok(allow("u")));
        let authorizer = Authorizer::new(&scheme(None, Some(60))).unwrap();
        let cache = AuthCache::new();
        let req = request("GET", &[("authorization", "t")], "");

        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_never_caches() {
        let (backend, calls) = counting_backend(Ok(allow("u")));
        let authorizer = Authorizer::new(&scheme(None, Some(0))).unwrap();
        let cache = AuthCache::new();
        let req = request("GET", &[("authorization", "t")], "");
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_never_returned() {
        let cache = AuthCache::new();
        cache.insert("s", "t", Arc::new(AuthorizerDecision::default()), Duration::from_secs(10));
        assert!(cache.get("s", "t").is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get("s", "t").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_removes_expired_entry() {
        let cache = AuthCache::new();
        cache.insert("s", "t", Arc::new(AuthorizerDecision::default()), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let (backend, calls) = counting_backend(Ok(allow("u")));
        let authorizer = Authorizer::new(&scheme(None, Some(u64::MAX))).unwrap();
        let cache = AuthCache::new();
        let req = request("GET", &[("authorization", "t")], "");
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        authorizer.authorize(&req, &backend, &cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_eviction_keeps_newer_entry() {
        let cache = AuthCache::new();
        cache.insert("s", "t", Arc::new(AuthorizerDecision::default()), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("s", "t").is_none());
        cache.insert("s", "t", Arc::new(AuthorizerDecision::default()), Duration::from_secs(60));

        // The first entry's eviction task must leave the new entry alone.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("s", "t").is_some());
    }

    #[tokio::test]
    async fn rejection_bodies() {
        use http_body_util::BodyExt;
        let body = |r: Response<Full<Bytes>>| async move {
            String::from_utf8(r.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap()
        };
        assert_eq!(body(Rejection::Unauthorized.to_response()).await, r#"{"message":"Unauthorized"}"#);
        assert_eq!(
            body(Rejection::Denied.to_response()).await,
            r#"{"message":"User is not authorized to access this resource"}"#
        );
    }
}
