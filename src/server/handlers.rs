use super::AppState;
use crate::domain::model::{PatientRecord, FEATURE_NAMES};
use crate::server::metrics::CONTENT_TYPE;
use crate::utils::error::RiskError;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub const SERVICE_NAME: &str = "Heart Disease Prediction API";

/// 欄位範圍: (最小值, 最大值, 是否為整數)
const FIELD_RULES: [(f64, Option<f64>, bool); 13] = [
    (0.0, Some(120.0), false), // age
    (0.0, Some(1.0), true),    // sex
    (0.0, Some(3.0), true),    // cp
    (0.0, None, false),        // trestbps
    (0.0, None, false),        // chol
    (0.0, Some(1.0), true),    // fbs
    (0.0, Some(2.0), true),    // restecg
    (0.0, None, false),        // thalach
    (0.0, Some(1.0), true),    // exang
    (0.0, None, false),        // oldpeak
    (0.0, Some(2.0), true),    // slope
    (0.0, Some(4.0), true),    // ca
    (0.0, Some(3.0), true),    // thal
];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationDetail {
    fn field(name: &str, msg: String, kind: &str) -> Self {
        Self {
            loc: vec!["body".to_string(), name.to_string()],
            msg,
            kind: kind.to_string(),
        }
    }
}

/// Range and integrality checks for every input field.
pub fn validate_record(record: &PatientRecord) -> Vec<ValidationDetail> {
    let mut details = Vec::new();
    for ((name, value), (min, max, integer)) in FEATURE_NAMES
        .iter()
        .zip(record.to_features())
        .zip(FIELD_RULES)
    {
        if !value.is_finite() {
            details.push(ValidationDetail::field(
                name,
                "Input should be a finite number".to_string(),
                "finite_number",
            ));
            continue;
        }
        if integer && value.fract() != 0.0 {
            details.push(ValidationDetail::field(
                name,
                "Input should be a valid integer, got a number with a fractional part".to_string(),
                "int_from_float",
            ));
        }
        if value < min {
            details.push(ValidationDetail::field(
                name,
                format!("Input should be greater than or equal to {}", min),
                "greater_than_equal",
            ));
        }
        if let Some(max) = max {
            if value > max {
                details.push(ValidationDetail::field(
                    name,
                    format!("Input should be less than or equal to {}", max),
                    "less_than_equal",
                ));
            }
        }
    }
    details
}

#[derive(Debug)]
pub enum ApiError {
    Validation(Vec<ValidationDetail>),
    Unavailable,
    Internal(String),
}

impl From<RiskError> for ApiError {
    fn from(err: RiskError) -> Self {
        match err {
            RiskError::ModelUnavailable => ApiError::Unavailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "Model not loaded" })),
            )
                .into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("Prediction failed: {}", message) })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: u8,
    pub probability: f64,
    pub confidence: String,
    pub timestamp: String,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": state.predictor.is_model_loaded(),
        "preprocessor_loaded": state.predictor.is_preprocessor_loaded(),
    }))
}

pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PatientRecord>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(record) = payload.map_err(|rejection| {
        tracing::warn!("Rejected prediction request: {}", rejection.body_text());
        ApiError::Validation(vec![ValidationDetail {
            loc: vec!["body".to_string()],
            msg: rejection.body_text(),
            kind: "json_invalid".to_string(),
        }])
    })?;

    let details = validate_record(&record);
    if !details.is_empty() {
        tracing::warn!("Prediction request failed validation: {} field(s)", details.len());
        return Err(ApiError::Validation(details));
    }

    tracing::info!("Prediction request received: {:?}", record);
    let result = state.predictor.predict(&record).map_err(|e| {
        if !matches!(e, RiskError::ModelUnavailable) {
            tracing::error!("Prediction error: {}", e);
        }
        ApiError::from(e)
    })?;

    state.metrics.record_prediction(result.prediction);
    tracing::info!(
        "Prediction: {}, Probability: {:.4}, Confidence: {}",
        result.prediction,
        result.probability,
        result.confidence
    );

    Ok(Json(PredictionResponse {
        prediction: result.prediction,
        probability: result.probability,
        confidence: result.confidence.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_record_is_valid() {
        assert!(validate_record(&PatientRecord::sample()).is_empty());
    }

    #[test]
    fn test_out_of_range_fields_are_reported() {
        let mut record = PatientRecord::sample();
        record.age = -1.0;
        record.thal = 7.0;
        let details = validate_record(&record);

        assert_eq!(details.len(), 2);
        assert_eq!(details[0].loc, vec!["body", "age"]);
        assert_eq!(details[0].kind, "greater_than_equal");
        assert_eq!(details[1].loc, vec!["body", "thal"]);
        assert_eq!(details[1].kind, "less_than_equal");
    }

    #[test]
    fn test_fractional_integer_field_is_rejected() {
        let mut record = PatientRecord::sample();
        record.cp = 1.5;
        let details = validate_record(&record);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].kind, "int_from_float");

        // 連續欄位允許小數
        record.cp = 1.0;
        record.oldpeak = 1.75;
        assert!(validate_record(&record).is_empty());
    }
}
