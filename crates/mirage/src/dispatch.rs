//! Per-method processors: mock, template-mapped and proxy integrations,
//! optionally behind a token authorizer.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;
use mirage_spec::{Integration, MethodSpec, ResponseMap};
use mirage_template::{Input, Params, RenderContext, Template, TemplateCache, TemplateError};
use serde_json::{Map, Value};

use crate::auth::{AuthCache, Authorizer};
use crate::backend::{invoke_detached, Backend, InvocationKind, InvokeOptions};
use crate::config::GatewayConfig;
use crate::error::{BuildError, GatewayError};
use crate::params::ParameterMapper;
use crate::proxy;
use crate::request::{RequestParts, JSON_MEDIA_TYPE};
use crate::response::{error_data, message_response, ResponseSelector};

/// State shared by every handler of a gateway.
pub(crate) struct Shared {
    pub(crate) config: GatewayConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) templates: TemplateCache,
    pub(crate) auth_cache: AuthCache,
}

/// Request templates by media type. `application/json` is the fallback
/// and always present.
struct RequestTemplates {
    by_type: BTreeMap<String, String>,
    fallback: String,
}

impl RequestTemplates {
    fn select(&self, media_type: Option<&str>) -> &str {
        media_type
            .and_then(|media| self.by_type.get(media))
            .unwrap_or(&self.fallback)
    }
}

enum Processor {
    Mock {
        selector: ResponseSelector,
        body: Arc<Template>,
    },
    Aws {
        mapper: ParameterMapper,
        backend: String,
        request_templates: Option<RequestTemplates>,
        selector: ResponseSelector,
    },
    Proxy {
        backend: String,
    },
}

/// The processor for one (route, verb) pair.
pub(crate) struct MethodHandler {
    processor: Processor,
    authorizer: Option<Authorizer>,
}

impl MethodHandler {
    pub(crate) fn build(path: &str, method: &MethodSpec, shared: &Shared) -> Result<Self, BuildError> {
        let fail = |reason: String| BuildError::Method {
            method: method.key.to_string(),
            path: path.to_string(),
            reason,
        };
        let stage_variables = &shared.config.stage_variables;

        let processor = match &method.integration {
            Integration::Mock {
                responses,
                body_template,
            } => {
                if responses.default.is_none() {
                    return Err(fail("mock integration requires a 'default' response".into()));
                }
                let selector = ResponseSelector::new(responses, stage_variables).map_err(fail)?;
                let body = shared
                    .templates
                    .get_or_compile(body_template)
                    .map_err(|e| fail(e.to_string()))?;
                Processor::Mock { selector, body }
            }
            Integration::Aws {
                backend,
                request_templates,
                responses,
            } => {
                let request_templates = match request_templates {
                    None => None,
                    Some(by_type) => {
                        let fallback = by_type.get(JSON_MEDIA_TYPE).cloned().ok_or_else(|| {
                            fail("requestTemplates must declare 'application/json'".into())
                        })?;
                        for source in by_type.values() {
                            shared
                                .templates
                                .get_or_compile(source)
                                .map_err(|e| fail(e.to_string()))?;
                        }
                        Some(RequestTemplates {
                            by_type: by_type.clone(),
                            fallback,
                        })
                    }
                };
                precompile_response_templates(responses, &shared.templates)
                    .map_err(|e| fail(e.to_string()))?;
                Processor::Aws {
                    mapper: ParameterMapper::new(&method.parameters),
                    backend: backend.clone(),
                    request_templates,
                    selector: ResponseSelector::new(responses, stage_variables).map_err(fail)?,
                }
            }
            Integration::AwsProxy { backend } => Processor::Proxy {
                backend: backend.clone(),
            },
        };

        let authorizer = method
            .security
            .as_ref()
            .map(Authorizer::new)
            .transpose()
            .map_err(fail)?;

        Ok(Self {
            processor,
            authorizer,
        })
    }

    pub(crate) async fn handle(&self, request: &RequestParts, shared: &Shared) -> Response<Full<Bytes>> {
        let authorizer = match &self.authorizer {
            Some(authorizer) => {
                match authorizer
                    .authorize(request, &shared.backend, &shared.auth_cache)
                    .await
                {
                    Ok(decision) => Some(decision.to_context_value()),
                    Err(rejection) => return rejection.to_response(),
                }
            }
            None => None,
        };

        let result = match &self.processor {
            Processor::Mock { selector, body } => {
                mock(selector, body, request, authorizer.as_ref(), shared)
            }
            Processor::Aws {
                mapper,
                backend,
                request_templates,
                selector,
            } => {
                let integration = AwsIntegration {
                    mapper,
                    backend,
                    request_templates: request_templates.as_ref(),
                    selector,
                };
                integration.run(request, authorizer.as_ref(), shared).await
            }
            Processor::Proxy { backend } => {
                proxy_integration(backend, request, authorizer.as_ref(), shared).await
            }
        };

        result.unwrap_or_else(|e| {
            if let GatewayError::Template(cause) = &e {
                mirage_telemetry::log_template_failure!(
                    request_id = %request.request_id,
                    resource = %request.resource,
                    error = %cause,
                    "mapping template failed"
                );
            } else {
                mirage_telemetry::log_dispatch_error!(
                    request_id = %request.request_id,
                    resource = %request.resource,
                    error = %e,
                    "request dispatch failed"
                );
            }
            e.to_response()
        })
    }
}

fn precompile_response_templates(responses: &ResponseMap, cache: &TemplateCache) -> Result<(), TemplateError> {
    let defs = responses
        .patterns
        .iter()
        .map(|(_, def)| def)
        .chain(responses.default.as_ref());
    for def in defs {
        for source in def.templates.values() {
            cache.get_or_compile(source)?;
        }
    }
    Ok(())
}

/// The `$context` variable.
fn template_context(request: &RequestParts, config: &GatewayConfig, authorizer: Option<&Value>) -> Value {
    let mut context = Map::new();
    context.insert("stage".into(), Value::String(config.stage.clone()));
    context.insert("requestId".into(), Value::String(request.request_id.clone()));
    context.insert("httpMethod".into(), Value::String(request.method.clone()));
    context.insert("resourcePath".into(), Value::String(request.resource.clone()));
    context.insert("accountId".into(), Value::String(config.account_id.clone()));
    if let Some(authorizer) = authorizer {
        context.insert("authorizer".into(), authorizer.clone());
    }
    Value::Object(context)
}

fn mock(
    selector: &ResponseSelector,
    body: &Template,
    request: &RequestParts,
    authorizer: Option<&Value>,
    shared: &Shared,
) -> Result<Response<Full<Bytes>>, GatewayError> {
    let response = selector.select(None).ok_or(GatewayError::MissingResponse)?;
    let context = template_context(request, &shared.config, authorizer);
    let params = Params::default();
    let rendered = body.render(&RenderContext {
        context: &context,
        input: Input {
            params: &params,
            payload: &Value::Null,
            body: "",
        },
        stage_variables: &shared.config.stage_variables,
    })?;
    Ok(response.respond(rendered))
}

struct AwsIntegration<'a> {
    mapper: &'a ParameterMapper,
    backend: &'a str,
    request_templates: Option<&'a RequestTemplates>,
    selector: &'a ResponseSelector,
}

impl AwsIntegration<'_> {
    async fn run(
        &self,
        request: &RequestParts,
        authorizer: Option<&Value>,
        shared: &Shared,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let event = match self.mapper.map(request) {
            Ok(event) => event,
            Err(invalid) => {
                mirage_telemetry::log_invalid_request!(
                    request_id = %request.request_id,
                    method = %request.method,
                    path = %request.path,
                    reason = %invalid,
                    "invalid request"
                );
                return Ok(message_response(StatusCode::BAD_REQUEST, "errorMessage", "Invalid request"));
            }
        };

        let context = template_context(request, &shared.config, authorizer);
        let stage_variables = &shared.config.stage_variables;

        let payload = match self.request_templates {
            None => event.flat(),
            Some(templates) => {
                let source = templates.select(request.media_type().as_deref());
                let template = shared.templates.get_or_compile(source)?;
                let params = request.template_params();
                let rendered = template.render(&RenderContext {
                    context: &context,
                    input: Input {
                        params: &params,
                        payload: &event.payload,
                        body: &request.body,
                    },
                    stage_variables,
                })?;
                serde_json::from_str(&rendered).map_err(|e| GatewayError::EventJson(e.to_string()))?
            }
        };

        let options = InvokeOptions {
            request_id: request.request_id.clone(),
            kind: InvocationKind::Integration,
        };
        let (response, data) = match invoke_detached(&shared.backend, self.backend, payload, options).await {
            Ok(data) => (self.selector.select(None), data),
            Err(e) => {
                tracing::debug!(request_id = %request.request_id, error = %e, "backend reported an error");
                (self.selector.select(Some(e.message.as_str())), error_data(&e.message))
            }
        };
        let response = response.ok_or(GatewayError::MissingResponse)?;

        let body = match response.template(JSON_MEDIA_TYPE) {
            Some(source) => {
                let template = shared.templates.get_or_compile(source)?;
                let params = Params::default();
                let raw = data.to_string();
                template.render(&RenderContext {
                    context: &context,
                    input: Input {
                        params: &params,
                        payload: &data,
                        body: &raw,
                    },
                    stage_variables,
                })?
            }
            None => data.to_string(),
        };
        Ok(response.respond(body))
    }
}

async fn proxy_integration(
    backend: &str,
    request: &RequestParts,
    authorizer: Option<&Value>,
    shared: &Shared,
) -> Result<Response<Full<Bytes>>, GatewayError> {
    let envelope = proxy::build_envelope(request, &shared.config, authorizer);
    let options = InvokeOptions {
        request_id: request.request_id.clone(),
        kind: InvocationKind::Proxy,
    };
    let reply = invoke_detached(&shared.backend, backend, envelope, options)
        .await
        .map_err(GatewayError::Backend)?;
    proxy::parse_reply(&reply)
}
