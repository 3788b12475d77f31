//! HTTP API server for the actuation gateway

mod auth;
pub mod health;
pub mod mcp;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderName;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use mcp::{GatewayError, MCP_SESSION_ID};

use crate::Result;
use crate::effects::EffectScheduler;
use crate::session::SessionRegistry;
use crate::tools::HighlightTools;

/// Shared state for API handlers
pub struct ApiState {
    pub sessions: SessionRegistry,
    pub scheduler: Arc<EffectScheduler>,
    /// When set, `/mcp` requires `Authorization: Bearer <token>`
    pub bearer_token: Option<SecretString>,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("sessions", &self.sessions)
            .field("auth", &self.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    tools: HighlightTools,
    port: u16,
    bearer_token: Option<SecretString>,
    session_idle_timeout: Option<Duration>,
}

impl ApiServerBuilder {
    /// Create a builder serving `tools`
    #[must_use]
    pub fn new(tools: HighlightTools) -> Self {
        Self {
            tools,
            port: crate::config::DEFAULT_PORT,
            bearer_token: None,
            session_idle_timeout: None,
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn bearer_token(mut self, token: Option<SecretString>) -> Self {
        self.bearer_token = token;
        self
    }

    /// End sessions idle longer than `timeout`; `None` keeps them forever
    #[must_use]
    pub const fn session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            scheduler: self.tools.scheduler().clone(),
            sessions: SessionRegistry::new(self.tools),
            bearer_token: self.bearer_token,
        });

        ApiServer {
            state,
            port: self.port,
            session_idle_timeout: self.session_idle_timeout,
        }
    }
}

pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    session_idle_timeout: Option<Duration>,
}

impl ApiServer {
    /// Shared handler state
    #[must_use]
    pub const fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Build the full router: `/mcp` behind bearer auth, `/health` open
    pub fn router(&self) -> Router {
        let mcp = mcp::router()
            .route_layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_bearer,
            ))
            .with_state(self.state.clone());

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);

        Router::new()
            .merge(mcp)
            .merge(health::router(self.state.clone()))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown every session is ended (closing open push streams) and
    /// every running effect is stopped.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "API server listening");
        }
        if self.state.bearer_token.is_none() {
            tracing::warn!("MCP_BEARER_TOKEN not set - /mcp is unauthenticated");
        }

        let reaper = self.session_idle_timeout.map(|timeout| {
            tracing::debug!(?timeout, "idle session reaper enabled");
            self.state.sessions.spawn_reaper(timeout)
        });

        let state = self.state.clone();
        let shutdown = async move {
            shutdown.await;
            let ended = state.sessions.shutdown();
            state.scheduler.shutdown();
            tracing::info!(sessions = ended, "shutting down");
        };

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(reaper) = reaper {
            reaper.abort();
        }
        served.map_err(|e| crate::Error::Config(format!("API server error: {e}")))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
