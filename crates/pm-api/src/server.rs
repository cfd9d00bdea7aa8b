//! HTTP API Server
//!
//! Builds the router and runs it until the shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pm_core::{ApiConfig, ArtifactConfig};
use pm_crawler::Dispatcher;
use pm_worker::JobQueue;

use crate::middleware::auth::auth_middleware;
use crate::routes::{api_routes, public_routes};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// `None` when the in-process worker is disabled
    pub jobs: Option<JobQueue>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            jobs: None,
            api_key: None,
        }
    }

    pub fn with_jobs(mut self, jobs: JobQueue) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Require `Authorization: Bearer <key>` on the API routes. A blank key
    /// disables the check.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the full application router
pub fn router(state: AppState, api: &ApiConfig, artifacts: &ArtifactConfig) -> Router {
    let protected = api_routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    let mount = format!("/{}", artifacts.mount.trim_matches('/'));

    Router::new()
        .merge(public_routes())
        .merge(protected)
        .nest_service(&mount, ServeDir::new(&artifacts.root))
        .layer(cors_layer(api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
pub async fn start_server<F>(
    state: AppState,
    api: &ApiConfig,
    artifacts: &ArtifactConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, api, artifacts);

    let addr: SocketAddr = format!("{}:{}", api.host, api.port).parse()?;
    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
