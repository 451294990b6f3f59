use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sanctum_auth::{HandshakeVerifier, JwtAuthenticator, PrimaryAuthenticator, TicketAuthority};
use sanctum_cache::SharedStore;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, handlers, metrics::record_http_request, realtime};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub authenticator: Arc<dyn PrimaryAuthenticator>,
    pub tickets: TicketAuthority,
    pub verifier: HandshakeVerifier,
}

impl AppState {
    /// Wire the authenticator, ticket authority and handshake verifier onto
    /// one store.
    pub fn from_config(cfg: &AppConfig, store: SharedStore) -> Self {
        let authenticator =
            JwtAuthenticator::new(&cfg.auth.jwt).with_revocations(store.clone());
        let tickets = TicketAuthority::from_config(store.clone(), &cfg.auth);
        Self {
            authenticator: Arc::new(authenticator),
            verifier: HandshakeVerifier::new(tickets.clone()),
            tickets,
            store,
        }
    }
}

pub fn build_app(state: AppState, body_limit: usize) -> Router {
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        // Realtime
        .route("/api/ws/ticket", post(realtime::issue_ticket))
        .route("/api/ws", get(realtime::realtime_upgrade))
        .layer(middleware::from_fn(track_http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    // Path only: the query string of /api/ws carries the ticket
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.path = %req.uri().path(),
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn track_http_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(req).await;
    record_http_request(&method, &route, response.status().as_u16(), start.elapsed());
    response
}

pub struct SanctumServer {
    addr: SocketAddr,
    app: Router,
    store: SharedStore,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    store: Option<SharedStore>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            store: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use an existing store instead of connecting from `store` config.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> anyhow::Result<SanctumServer> {
        self.config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

        let store = match self.store {
            Some(store) => store,
            None => sanctum_cache::connect(&self.config.store).await,
        };
        tracing::info!(backend = store.backend_name(), "Cache store ready");

        let state = AppState::from_config(&self.config, store.clone());
        let app = build_app(state, self.config.server.body_limit_bytes);

        Ok(SanctumServer {
            addr: self.addr,
            app,
            store,
        })
    }
}

impl SanctumServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.store.close().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
