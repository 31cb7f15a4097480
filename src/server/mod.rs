//! REST API serving predictions, health and Prometheus metrics.

pub mod handlers;
pub mod metrics;

use crate::config::toml_config::TomlConfig;
use crate::core::predictor::Predictor;
use crate::utils::error::{Result, RiskError};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use self::metrics::ApiMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<Predictor>,
    pub metrics: Arc<ApiMetrics>,
}

impl AppState {
    pub fn new(predictor: Predictor) -> Result<Self> {
        let metrics = ApiMetrics::new()?;
        metrics.set_model_loaded(predictor.is_model_loaded());
        Ok(Self {
            predictor: Arc::new(predictor),
            metrics: Arc::new(metrics),
        })
    }
}

async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    state.metrics.observe_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/predict", post(handlers::predict))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
}

/// Serve on an already bound listener until ctrl-c.
pub async fn serve_with_listener(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("🌐 {} listening on http://{}", handlers::SERVICE_NAME, addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}

pub async fn serve(config: &TomlConfig, predictor: Predictor) -> Result<()> {
    tracing::info!("Starting {}...", handlers::SERVICE_NAME);
    let state = AppState::new(predictor)?;
    if !state.predictor.is_model_loaded() {
        tracing::warn!("⚠️ No model loaded; /predict will answer 503");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| RiskError::ConfigError {
        message: format!("cannot bind {}: {}", addr, e),
    })?;
    tracing::info!("API ready to serve predictions");
    serve_with_listener(listener, state).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
