//! HTTP client for the remote ETA model service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::estimator::{EstimatorError, EtaDays, EtaEstimate, EtaEstimator, EtaRequest, ModelInfo};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls `POST {base}/predict` and `GET {base}/model/info`.
#[derive(Clone)]
pub struct HttpEtaEstimator {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictBody<'a> {
    user_id: String,
    tax_year: i32,
    status: &'a str,
    filing_state: &'a str,
    /// Sent as an exact decimal string.
    expected_amount: Option<Decimal>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    eta_days: i64,
    #[serde(default = "unknown")]
    model_name: String,
    #[serde(default = "unknown")]
    model_version: String,
    #[serde(default)]
    features: Option<JsonValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfoResponse {
    #[serde(default = "unknown")]
    model_name: String,
    #[serde(default = "unknown")]
    model_version: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl HttpEtaEstimator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

fn transport_error(e: reqwest::Error) -> EstimatorError {
    if e.is_timeout() {
        EstimatorError::Timeout
    } else {
        EstimatorError::Transport(e.to_string())
    }
}

/// Pull a readable message out of an error body (`detail`/`message`/raw text).
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<JsonValue>(body)
        .ok()
        .and_then(|value| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|k| value.get(*k).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).to_string())
}

#[async_trait]
impl EtaEstimator for HttpEtaEstimator {
    async fn predict(&self, request: &EtaRequest) -> Result<EtaEstimate, EstimatorError> {
        let body = PredictBody {
            user_id: request.user_id.to_string(),
            tax_year: request.tax_year.value(),
            status: request.status.as_str(),
            filing_state: &request.filing_state,
            expected_amount: request.expected_amount,
        };

        let response = self
            .client
            .post(self.url("/predict"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed = response
                .json::<PredictResponse>()
                .await
                .map_err(|e| EstimatorError::Parse(e.to_string()))?;
            debug!(
                eta_days = parsed.eta_days,
                model_version = %parsed.model_version,
                "estimator answered"
            );
            return Ok(EtaEstimate {
                eta: EtaDays::clamped(parsed.eta_days),
                model_name: parsed.model_name,
                model_version: parsed.model_version,
                features: parsed
                    .features
                    .unwrap_or_else(|| JsonValue::Object(Default::default())),
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let message = error_message(&body);

        match status {
            StatusCode::SERVICE_UNAVAILABLE => {
                warn!(%message, "estimator model unavailable");
                Ok(EtaEstimate::unavailable("unknown", "untrained"))
            }
            s if s.is_client_error() => Err(EstimatorError::Rejected {
                status: s.as_u16(),
                message,
            }),
            s => Err(EstimatorError::Status {
                status: s.as_u16(),
                message,
            }),
        }
    }

    async fn model_info(&self) -> ModelInfo {
        let response = match self.client.get(self.url("/model/info")).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "model info request failed");
                return ModelInfo::unavailable();
            }
            Err(e) => {
                warn!(error = %e, "model info request failed");
                return ModelInfo::unavailable();
            }
        };

        match response.json::<ModelInfoResponse>().await {
            Ok(info) => ModelInfo::new(info.model_name, info.model_version),
            Err(e) => {
                warn!(error = %e, "model info response unreadable");
                ModelInfo::unavailable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::MAX_ETA_DAYS;
    use axum::Router;
    use axum::routing::{get, post};
    use refundsync_core::{RefundStatus, TaxYear, UserId};
    use serde_json::json;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    async fn predict_server(status: StatusCode, body: JsonValue) -> String {
        spawn_server(Router::new().route(
            "/predict",
            post(move || {
                let body = body.clone();
                async move { (status, axum::Json(body)) }
            }),
        ))
        .await
    }

    fn request() -> EtaRequest {
        EtaRequest {
            user_id: UserId::from_uuid(uuid::Uuid::nil()),
            tax_year: TaxYear::new(2025).unwrap(),
            status: RefundStatus::Processing,
            filing_state: "CA".to_string(),
            expected_amount: Some(Decimal::new(123456, 2)),
        }
    }

    #[tokio::test]
    async fn predict_parses_and_clamps() {
        let base = predict_server(
            StatusCode::OK,
            json!({"etaDays": 4000, "modelName": "gbrt", "modelVersion": "v1", "features": {"dow": 2}}),
        )
        .await;

        let estimate = HttpEtaEstimator::new(base).predict(&request()).await.unwrap();
        assert_eq!(estimate.eta, EtaDays::Days(MAX_ETA_DAYS));
        assert_eq!(estimate.model_version, "v1");
        assert_eq!(estimate.features["dow"], 2);
    }

    #[tokio::test]
    async fn request_body_carries_the_exact_amount() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None::<JsonValue>));
        let captured = seen.clone();
        let base = spawn_server(Router::new().route(
            "/predict",
            post(move |axum::Json(body): axum::Json<JsonValue>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    axum::Json(json!({"etaDays": 3, "modelName": "gbrt", "modelVersion": "v1"}))
                }
            }),
        ))
        .await;

        let mut req = request();
        req.expected_amount = Some(Decimal::new(1_000_000_000_000_000_001, 2));
        HttpEtaEstimator::new(base).predict(&req).await.unwrap();

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["expectedAmount"], "10000000000000000.01");
        assert_eq!(body["status"], "PROCESSING");
        assert_eq!(body["filingState"], "CA");
    }

    #[tokio::test]
    async fn service_unavailable_is_the_untrained_sentinel() {
        let base = predict_server(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"detail": "Model not trained yet. Call /train first."}),
        )
        .await;

        let estimate = HttpEtaEstimator::new(base).predict(&request()).await.unwrap();
        assert_eq!(estimate.eta, EtaDays::Unavailable);
    }

    #[tokio::test]
    async fn client_and_server_errors_are_classified() {
        let base = predict_server(StatusCode::UNPROCESSABLE_ENTITY, json!({"detail": "bad status"})).await;
        let err = HttpEtaEstimator::new(base).predict(&request()).await.unwrap_err();
        assert!(matches!(err, EstimatorError::Rejected { status: 422, .. }));
        assert!(!err.is_transient());

        let base = predict_server(StatusCode::BAD_GATEWAY, json!({"message": "upstream"})).await;
        let err = HttpEtaEstimator::new(base).predict(&request()).await.unwrap_err();
        assert!(matches!(err, EstimatorError::Status { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn model_info_falls_back_when_unreachable() {
        let base = spawn_server(Router::new().route(
            "/model/info",
            get(|| async { axum::Json(json!({"modelName": "gbrt", "modelVersion": "20250101T000000Z"})) }),
        ))
        .await;
        let info = HttpEtaEstimator::new(base).model_info().await;
        assert_eq!(info, ModelInfo::new("gbrt", "20250101T000000Z"));

        let dead = HttpEtaEstimator::with_timeout("http://127.0.0.1:9", Duration::from_millis(200));
        assert_eq!(dead.model_info().await, ModelInfo::unavailable());
    }
}
