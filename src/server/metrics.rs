//! Prometheus collectors for the prediction API.

use crate::utils::error::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Collectors live in their own registry so every server instance (and every
/// test) starts from zero.
#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    pub requests: IntCounterVec,
    pub request_duration: HistogramVec,
    pub predictions: IntCounterVec,
    pub model_loaded: IntGauge,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let predictions = IntCounterVec::new(
            Opts::new("predictions_total", "Total predictions served"),
            &["prediction"],
        )?;
        let model_loaded = IntGauge::new("model_loaded", "Whether a model is loaded (1) or not (0)")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(predictions.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            predictions,
            model_loaded,
        })
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        self.requests
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.request_duration
            .with_label_values(&[method, endpoint])
            .observe(seconds);
    }

    pub fn record_prediction(&self, prediction: u8) {
        self.predictions
            .with_label_values(&[&prediction.to_string()])
            .inc();
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(i64::from(loaded));
    }

    /// Text exposition of every collector.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
