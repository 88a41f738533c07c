//! End-to-end scenarios over real HTTP.

use mirage::{GatewayConfig, InvocationKind};
use reqwest::Method;
use serde_json::{json, Value};

use crate::{StubBackend, TestGateway};

const MOCK: &str = "../../tests/fixtures/mock.yaml";
const ITEMS: &str = "../../tests/fixtures/items.yaml";
const PROXY: &str = "../../tests/fixtures/proxy.yaml";
const SECURED: &str = "../../tests/fixtures/secured.yaml";

fn prod() -> GatewayConfig {
    GatewayConfig::default().with_stage_variable("env", "prod")
}

async fn start(spec: &str, stub: &StubBackend) -> TestGateway {
    TestGateway::from_spec(spec, prod(), stub.shared())
        .await
        .expect("failed to start gateway")
}

#[tokio::test]
async fn mock_header_from_stage_variable() {
    let stub = StubBackend::new();
    let gateway = start(MOCK, &stub).await;

    let resp = gateway.get("/items/42").await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-id"], "prod");
    assert_eq!(resp.headers()["x-static"], "yes");
    assert_eq!(resp.headers()["content-type"], "application/json");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "stage": "local", "env": "prod" }));
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn required_body_property() {
    let stub = StubBackend::new().with_reply("create-item", json!({ "id": 1 }));
    let gateway = start(ITEMS, &stub).await;

    let resp = gateway.post("/v1/items", "{}").await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "errorMessage": "Invalid request" }));
    assert_eq!(stub.call_count(), 0);

    let resp = gateway.post("/v1/items", r#"{"name":"x"}"#).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "id": 1 }));

    let calls = stub.invocations_of("create-item");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].event, json!({ "name": "x" }));
    assert_eq!(calls[0].kind, InvocationKind::Integration);
}

#[tokio::test]
async fn request_template_renders_event() {
    let stub = StubBackend::new().with_reply("get-item", json!({ "id": 7, "name": "x" }));
    let gateway = start(ITEMS, &stub).await;

    let resp = gateway.get("/v1/items/7?fields=name%22").await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "item": { "id": 7, "name": "x" } }));

    let calls = stub.invocations_of("get-item");
    assert_eq!(calls[0].event["id"], json!(7));
    assert_eq!(calls[0].event["fields"], json!("name\""));
    assert_eq!(calls[0].event["requestId"], json!(calls[0].request_id));
}

#[tokio::test]
async fn error_pattern_selects_response() {
    let stub = StubBackend::new().with_error("get-item", "E_NOT_FOUND: missing");
    let gateway = start(ITEMS, &stub).await;

    let resp = gateway.get("/v1/items/7").await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "E_NOT_FOUND: missing" }));

    stub.set_error("get-item", "E_INVALID: bad id");
    let resp = gateway.get("/v1/items/7").await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "errorMessage": "E_INVALID: bad id" }));
}

#[tokio::test]
async fn proxy_reply_passes_through() {
    let stub = StubBackend::new().with_reply(
        "api",
        json!({ "statusCode": 201, "body": "{}", "headers": {} }),
    );
    let gateway = start(PROXY, &stub).await;

    let resp = gateway
        .request_with_headers(Method::PUT, "/api/a/b?x=1", &[("x-custom-header", "v")])
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.text().await.unwrap(), "{}");

    let event = &stub.invocations_of("api")[0].event;
    assert_eq!(event["resource"], "/api/{proxy+}");
    assert_eq!(event["path"], "/api/a/b");
    assert_eq!(event["httpMethod"], "PUT");
    assert_eq!(event["pathParameters"], json!({ "proxy": "a/b" }));
    assert_eq!(event["queryStringParameters"], json!({ "x": "1" }));
    assert_eq!(event["headers"]["X-Custom-Header"], "v");
    assert_eq!(event["requestContext"]["stage"], "local");
    assert_eq!(event["stageVariables"], json!({ "env": "prod" }));
}

#[tokio::test]
async fn malformed_proxy_reply_is_bad_gateway() {
    let stub = StubBackend::new().with_reply("api", json!({ "statusCode": "201", "body": {} }));
    let gateway = start(PROXY, &stub).await;

    let resp = gateway.get("/api/x").await.unwrap();
    assert_eq!(resp.status(), 502);
}

#[tokio::test]
async fn proxy_backend_failure_is_internal_error() {
    let stub = StubBackend::new().with_error("api", "crashed");
    let gateway = start(PROXY, &stub).await;

    let resp = gateway.get("/api/x").await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Internal server error" }));
}

fn allow(principal: &str) -> Value {
    json!({
        "principalId": principal,
        "policyDocument": { "Statement": [{ "Effect": "Allow", "Action": "execute-api:Invoke" }] },
        "context": { "team": 7 }
    })
}

#[tokio::test]
async fn authorizer_accepts_and_caches() {
    let stub = StubBackend::new()
        .with_reply("authorizer", allow("alice"))
        .with_reply("me", json!({ "ok": true }));
    let gateway = start(SECURED, &stub).await;

    for _ in 0..2 {
        let resp = gateway
            .request_with_headers(Method::GET, "/me", &[("authorization", "Bearer abc")])
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let auth_calls = stub.invocations_of("authorizer");
    assert_eq!(auth_calls.len(), 1);
    assert_eq!(auth_calls[0].event, json!({ "authorizationToken": "Bearer abc" }));
    assert_eq!(auth_calls[0].kind, InvocationKind::Authorizer);

    let me = stub.invocations_of("me");
    assert_eq!(me.len(), 2);
    assert_eq!(me[0].event, json!({ "principal": "alice", "team": "7" }));
    assert_eq!(gateway.gateway().auth_cache().len(), 1);
}

#[tokio::test]
async fn authorizer_rejections() {
    let stub = StubBackend::new().with_reply("me", json!({}));
    let gateway = start(SECURED, &stub).await;

    let resp = gateway.get("/me").await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Unauthorized" }));

    let resp = gateway
        .request_with_headers(Method::GET, "/me", &[("authorization", "Basic abc")])
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(stub.call_count(), 0);

    stub.set_error("authorizer", "token expired");
    let resp = gateway
        .request_with_headers(Method::GET, "/me", &[("authorization", "Bearer abc")])
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "token expired" }));

    stub.set_reply(
        "authorizer",
        json!({ "principalId": "bob", "policyDocument": { "Statement": [{ "Effect": "Deny" }] } }),
    );
    let resp = gateway
        .request_with_headers(Method::GET, "/me", &[("authorization", "Bearer abc")])
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "User is not authorized to access this resource" }));

    assert!(stub.invocations_of("me").is_empty());
}

#[tokio::test]
async fn open_method_skips_authorizer() {
    let stub = StubBackend::new();
    let gateway = start(SECURED, &stub).await;

    let resp = gateway.get("/public").await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "public": true }));
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let stub = StubBackend::new();
    let gateway = start(ITEMS, &stub).await;

    for path in ["/items", "/v1/unknown", "/v1/items/1/extra"] {
        let resp = gateway.get(path).await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "message": "Not Found" }));
    }

    let resp = gateway.request(Method::DELETE, "/v1/items/1").await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn independent_gateways_share_nothing() {
    let first = StubBackend::new().with_reply("authorizer", allow("a")).with_reply("me", json!({}));
    let second = StubBackend::new().with_reply("authorizer", allow("b")).with_reply("me", json!({}));
    let a = start(SECURED, &first).await;
    let b = start(SECURED, &second).await;

    for gateway in [&a, &b] {
        let resp = gateway
            .request_with_headers(Method::GET, "/me", &[("authorization", "Bearer t")])
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(first.invocations_of("authorizer").len(), 1);
    assert_eq!(second.invocations_of("authorizer").len(), 1);
    assert_eq!(second.invocations_of("me")[0].event["principal"], "b");
}

#[tokio::test]
async fn invalid_spec_fails_to_start() {
    let spec = r#"
swagger: "2.0"
paths:
  /a:
    get:
      x-amazon-apigateway-integration:
        type: http
"#;
    let err = TestGateway::from_spec_str(spec, GatewayConfig::default(), StubBackend::new().shared())
        .await
        .err()
        .expect("build must fail");
    assert!(err.to_string().contains("/a"), "{err}");
}
