//! TestGateway: in-process gateway harness.

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use mirage::{Backend, BuildError, Gateway, GatewayConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Errors from TestGateway operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("gateway build failed: {0}")]
    Build(#[from] BuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A gateway serving on `127.0.0.1` at an OS-assigned port, plus HTTP
/// request helpers. The server task stops when the harness is dropped.
pub struct TestGateway {
    gateway: Arc<Gateway>,
    addr: SocketAddr,
    client: reqwest::Client,
    server: JoinHandle<()>,
}

impl TestGateway {
    /// Build a gateway from a spec file and start serving it.
    pub async fn from_spec(
        spec_path: &str,
        config: GatewayConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, TestError> {
        let spec = tokio::fs::read_to_string(spec_path).await?;
        Self::from_spec_str(&spec, config, backend).await
    }

    /// Build a gateway from YAML or JSON spec text and start serving it.
    pub async fn from_spec_str(
        spec: &str,
        config: GatewayConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, TestError> {
        let gateway = Gateway::from_spec_str(spec, config, backend)?;
        Self::start(gateway).await
    }

    /// Serve an already-built gateway. The first harness in a process also
    /// installs the log subscriber described by the gateway config, writing
    /// through libtest's capture.
    pub async fn start(gateway: Gateway) -> Result<Self, TestError> {
        static LOGGING: Once = Once::new();
        LOGGING.call_once(|| {
            let telemetry = gateway.config().telemetry().with_test_writer(true);
            // Another subscriber may already be installed in this process.
            let _ = mirage_telemetry::init(&telemetry);
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let gateway = Arc::new(gateway);
        let server = tokio::spawn(Arc::clone(&gateway).serve(listener));

        Ok(TestGateway {
            gateway,
            addr,
            client: reqwest::Client::new(),
            server,
        })
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// The underlying client, for requests the helpers do not cover.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, TestError> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    /// POST a JSON body.
    pub async fn post(&self, path: &str, body: &str) -> Result<reqwest::Response, TestError> {
        Ok(self
            .client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await?)
    }

    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::Response, TestError> {
        Ok(self.client.request(method, self.url(path)).send().await?)
    }

    /// A request with extra headers.
    pub async fn request_with_headers(
        &self,
        method: reqwest::Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, TestError> {
        let mut request = self.client.request(method, self.url(path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Ok(request.send().await?)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}
