//! The gateway: routing table, request handling and the HTTP accept loop.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use mirage_router::{strip_base_path, RouteMatch, Router};
use mirage_spec::{parse_spec, ApiSpec, MethodKey};
use mirage_template::TemplateCache;
use tokio::net::TcpListener;

use crate::auth::AuthCache;
use crate::backend::Backend;
use crate::config::GatewayConfig;
use crate::dispatch::{MethodHandler, Shared};
use crate::error::{BuildError, GatewayError};
use crate::request::{parse_query, RequestParts};
use crate::response::message_response;

/// Handlers of one route, by verb.
struct RouteHandlers {
    by_verb: HashMap<String, MethodHandler>,
    any: Option<MethodHandler>,
}

impl RouteHandlers {
    fn lookup(&self, method: &str) -> Option<&MethodHandler> {
        self.by_verb.get(method).or(self.any.as_ref())
    }
}

/// A running emulation of one API.
pub struct Gateway {
    router: Router<RouteHandlers>,
    base_path: Option<String>,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Build every method handler. Any problem in the API document aborts here.
    pub fn build(
        spec: &ApiSpec,
        config: GatewayConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, BuildError> {
        let shared = Shared {
            config,
            backend,
            templates: TemplateCache::new(),
            auth_cache: AuthCache::new(),
        };

        let mut router = Router::new();
        for route in &spec.routes {
            let mut handlers = RouteHandlers {
                by_verb: HashMap::new(),
                any: None,
            };
            for method in &route.methods {
                let handler = MethodHandler::build(&route.path, method, &shared)?;
                match &method.key {
                    MethodKey::Verb(verb) => {
                        handlers.by_verb.insert(verb.clone(), handler);
                    }
                    MethodKey::Any => handlers.any = Some(handler),
                }
            }
            router
                .insert(&route.path, handlers)
                .map_err(|source| BuildError::Route {
                    path: route.path.clone(),
                    source,
                })?;
        }

        mirage_telemetry::log_startup!(
            routes = router.len(),
            base_path = spec.base_path.as_deref().unwrap_or("/"),
            stage = %shared.config.stage,
            "gateway built"
        );

        Ok(Self {
            router,
            base_path: spec.base_path.clone(),
            shared: Arc::new(shared),
        })
    }

    /// Parse a resolved YAML or JSON spec and build the gateway from it.
    pub fn from_spec_str(
        spec: &str,
        config: GatewayConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, BuildError> {
        let spec = parse_spec(spec)?;
        Self::build(&spec, config, backend)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub fn template_cache(&self) -> &TemplateCache {
        &self.shared.templates
    }

    pub fn auth_cache(&self) -> &AuthCache {
        &self.shared.auth_cache
    }

    /// Route templates in matching order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.router.templates()
    }

    /// Answer one request. Never fails: every error becomes a response.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: Display,
    {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let method = req.method().as_str().to_ascii_uppercase();
        let path = req.uri().path().to_string();

        let response = self.route(req, &method, &path, &request_id).await;

        mirage_telemetry::log_request_completed!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok(response)
    }

    async fn route<B>(
        &self,
        req: Request<B>,
        method: &str,
        path: &str,
        request_id: &str,
    ) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let routed = match &self.base_path {
            Some(base_path) => strip_base_path(base_path, path),
            None => Some(path),
        };
        let Some(routed) = routed else {
            return not_found();
        };

        let RouteMatch::Found {
            resource,
            value: handlers,
            params,
        } = self.router.resolve(routed)
        else {
            return not_found();
        };
        let Some(handler) = handlers.lookup(method) else {
            return not_found();
        };

        let path_params = params
            .into_iter()
            .map(|(name, value)| {
                let decoded = match urlencoding::decode(&value) {
                    Ok(decoded) => decoded.into_owned(),
                    Err(_) => value.clone(),
                };
                (name, decoded)
            })
            .collect();
        let query = parse_query(req.uri().query());
        let (parts, body) = req.into_parts();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "failed to read request body");
                return message_response(StatusCode::BAD_REQUEST, "message", "Bad Request");
            }
        };

        let request = RequestParts {
            method: method.to_string(),
            path: path.to_string(),
            resource: resource.to_string(),
            path_params,
            query,
            headers: parts.headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            request_id: request_id.to_string(),
        };

        match AssertUnwindSafe(handler.handle(&request, &self.shared))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                mirage_telemetry::log_dispatch_error!(
                    request_id = %request_id,
                    resource = %request.resource,
                    "request handler panicked"
                );
                GatewayError::Panic.to_response()
            }
        }
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            mirage_telemetry::log_listening!(address = %addr, "accepting connections");
        }

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };

            let gateway = Arc::clone(&self);
            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.handle(req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(error = %e, "connection error");
                }
            });
        }
    }
}

fn not_found() -> Response<Full<Bytes>> {
    message_response(StatusCode::NOT_FOUND, "message", "Not Found")
}
