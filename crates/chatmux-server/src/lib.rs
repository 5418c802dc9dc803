//! HTTP server assembly for the chatmux gateway

#![allow(clippy::missing_errors_doc)]

mod auth;
mod cors;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chatmux_config::Config;
use chatmux_llm::{Gateway, LlmState};
use secrecy::ExposeSecret;
use tower_http::trace::TraceLayer;

/// Path always served by the health handler, next to the configured one
const HEALTHZ_PATH: &str = "/healthz";

const METRICS_PATH: &str = "/metrics";

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    gateway: Gateway,
}

impl Server {
    /// Build the server from configuration
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8000)));

        let gateway = Gateway::from_config(config)?;

        let mut llm = chatmux_llm::llm_router(LlmState::new(gateway.clone(), config.llm.reasoning.compat));

        // Gateway access token, `/v1/*` only
        if let Some(token) = config
            .server
            .access_token
            .as_ref()
            .filter(|token| !token.expose_secret().trim().is_empty())
        {
            let token = Arc::new(token.clone());
            llm = llm.layer(axum::middleware::from_fn(move |req, next| {
                let token = Arc::clone(&token);
                async move { auth::access_token_middleware(token, req, next).await }
            }));
        } else {
            tracing::warn!("no access token configured, /v1 endpoints are open");
        }

        let mut app = Router::new().merge(llm).route(
            METRICS_PATH,
            axum::routing::get(health::metrics_handler).with_state(gateway.clone()),
        );

        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
            if config.server.health.path != HEALTHZ_PATH {
                app = app.route(HEALTHZ_PATH, axum::routing::get(health::health_handler));
            }
        }

        app = app.layer(TraceLayer::new_for_http());

        if let Some(ref cors_config) = config.server.cors {
            app = app.layer(cors::cors_layer(cors_config));
        }

        Ok(Self {
            router: app,
            listen_address,
            gateway,
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Shared gateway, for metrics inspection
    #[must_use]
    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(
        self,
        listener: tokio::net::TcpListener,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use chatmux_config::{ProviderConfig, ProviderType};
    use http::{Request, StatusCode};
    use indexmap::IndexMap;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;

    fn config(access_token: Option<&str>) -> Config {
        let mut config = Config::default();
        config.server.access_token = access_token.map(SecretString::from);
        config.llm.default_provider = "grok".to_owned();
        config.llm.providers = IndexMap::from([("grok".to_owned(), ProviderConfig::of_type(ProviderType::Grok))]);
        config
    }

    async fn status(router: Router, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut request = Request::get(uri);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        router.oneshot(request.body(Body::empty()).unwrap()).await.unwrap().status()
    }

    #[tokio::test]
    async fn health_endpoints() {
        let router = Server::new(&config(None)).unwrap().into_router();
        assert_eq!(status(router.clone(), "/health", None).await, StatusCode::OK);
        assert_eq!(status(router, "/healthz", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn access_token_guards_v1_only() {
        let router = Server::new(&config(Some("s3cret"))).unwrap().into_router();

        assert_eq!(status(router.clone(), "/v1/models", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(router.clone(), "/v1/models", Some("wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(router.clone(), "/v1/models", Some("s3cret")).await, StatusCode::OK);
        assert_eq!(status(router.clone(), "/health", None).await, StatusCode::OK);
        assert_eq!(status(router, "/metrics", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn blank_access_token_disables_the_check() {
        let router = Server::new(&config(Some("  "))).unwrap().into_router();
        assert_eq!(status(router, "/v1/models", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_report_gate_snapshot() {
        let router = Server::new(&config(None)).unwrap().into_router();
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["requests_total"], 0);
        assert_eq!(body["gate"]["max_concurrency"], 1);
        assert_eq!(body["gate"]["active"], 0);
    }
}
