//! Prediction backends behind a common trait.
//!
//! Registry handles, availability self-tests, and the optimizer all talk to
//! models through [`Predictor`], so remote serving endpoints and the local
//! heuristic fallback are interchangeable.

use async_trait::async_trait;
use perkon_core::FeatureVector;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("prediction timed out after {0}ms")]
    Timeout(u64),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A loaded model capable of scoring feature vectors.
#[async_trait]
pub trait Predictor: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Scores a batch of feature vectors, returning one prediction per
    /// input in input order.
    async fn predict(&self, inputs: &[FeatureVector]) -> Result<Vec<f64>, PredictError>;
}

impl std::fmt::Debug for dyn Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor").field("kind", &self.kind()).finish()
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    inputs: &'a [FeatureVector],
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<f64>,
}

/// Scores against a remote serving endpoint over HTTP.
///
/// Sends `POST {endpoint}/predict` with `{"inputs": [...]}` and expects
/// `{"predictions": [...]}` back.
pub struct HttpPredictor {
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPredictor {
    pub fn new(endpoint: &str) -> Result<Self, PredictError> {
        Self::with_timeout(endpoint, Duration::from_secs(10))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, PredictError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictError::Backend(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn predict(&self, inputs: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/predict", self.endpoint);
        match self
            .client
            .post(&url)
            .json(&PredictRequest { inputs })
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let body: PredictResponse = response
                    .json()
                    .await
                    .map_err(|e| PredictError::Backend(e.to_string()))?;
                if body.predictions.len() != inputs.len() {
                    return Err(PredictError::Backend(format!(
                        "expected {} predictions, got {}",
                        inputs.len(),
                        body.predictions.len()
                    )));
                }
                Ok(body.predictions)
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(PredictError::Backend(format!("HTTP {} - {}", status, body)))
            }
            Err(e) if e.is_timeout() => Err(PredictError::Timeout(self.timeout.as_millis() as u64)),
            Err(e) => Err(PredictError::Unavailable(e.to_string())),
        }
    }
}

/// Rule-based fallback used when no trained artifact can be loaded.
///
/// With weights it computes `bias + sum(weight_i * feature_i)` over the
/// configured features (absent features count as zero); without weights it
/// falls back to the plain mean of the input values.
pub struct HeuristicPredictor {
    weights: FeatureVector,
    bias: f64,
}

impl HeuristicPredictor {
    pub fn new() -> Self {
        Self {
            weights: FeatureVector::default(),
            bias: 0.0,
        }
    }

    pub fn with_weights(weights: FeatureVector, bias: f64) -> Self {
        Self { weights, bias }
    }

    fn score(&self, input: &FeatureVector) -> Result<f64, PredictError> {
        if input.is_empty() {
            return Err(PredictError::InvalidInput("empty feature vector".into()));
        }
        if self.weights.is_empty() {
            let sum: f64 = input.values().sum();
            return Ok(sum / input.len() as f64 + self.bias);
        }
        let mut score = self.bias;
        for (name, weight) in &self.weights {
            score += weight * input.get(name).copied().unwrap_or(0.0);
        }
        Ok(score)
    }
}

impl Default for HeuristicPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Predictor for HeuristicPredictor {
    fn kind(&self) -> &'static str {
        "heuristic"
    }

    async fn predict(&self, inputs: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
        inputs.iter().map(|input| self.score(input)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn features(pairs: &[(&str, f64)]) -> FeatureVector {
        let mut fv = FeatureVector::default();
        for (name, value) in pairs {
            fv.insert(name.to_string(), *value);
        }
        fv
    }

    /// Serves exactly one canned HTTP response, then closes.
    async fn one_shot_server(status_line: &str, body: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status_line = status_line.to_string();
        let body = body.to_string();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_predictor_roundtrip() {
        let endpoint = one_shot_server("200 OK", r#"{"predictions":[1.5,2.5]}"#).await;
        let predictor = HttpPredictor::new(&endpoint).unwrap();

        let inputs = vec![features(&[("age", 30.0)]), features(&[("age", 40.0)])];
        let predictions = predictor.predict(&inputs).await.unwrap();
        assert_eq!(predictions, vec![1.5, 2.5]);
    }

    #[tokio::test]
    async fn test_http_predictor_server_error() {
        let endpoint = one_shot_server("500 Internal Server Error", "boom").await;
        let predictor = HttpPredictor::new(&endpoint).unwrap();

        let err = predictor
            .predict(&[features(&[("age", 30.0)])])
            .await
            .unwrap_err();
        assert!(matches!(err, PredictError::Backend(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_http_predictor_length_mismatch() {
        let endpoint = one_shot_server("200 OK", r#"{"predictions":[1.0]}"#).await;
        let predictor = HttpPredictor::new(&endpoint).unwrap();

        let inputs = vec![features(&[("a", 1.0)]), features(&[("a", 2.0)])];
        let err = predictor.predict(&inputs).await.unwrap_err();
        match err {
            PredictError::Backend(msg) => {
                assert!(msg.contains("expected 2"), "unexpected message: {}", msg)
            }
            other => panic!("expected Backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_predictor_empty_batch_skips_network() {
        // No server behind this endpoint; an empty batch must not hit it.
        let predictor = HttpPredictor::new("http://127.0.0.1:1").unwrap();
        let predictions = predictor.predict(&[]).await.unwrap();
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_http_predictor_trims_trailing_slash() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let predictor = HttpPredictor::new("http://host:8501/").unwrap();
        assert_eq!(predictor.endpoint(), "http://host:8501");
    }

    #[tokio::test]
    async fn test_heuristic_mean() {
        let predictor = HeuristicPredictor::new();
        let inputs = vec![features(&[("a", 2.0), ("b", 4.0)])];
        let predictions = predictor.predict(&inputs).await.unwrap();
        assert_eq!(predictions, vec![3.0]);
    }

    #[tokio::test]
    async fn test_heuristic_weighted() {
        let predictor = HeuristicPredictor::with_weights(
            features(&[("age", 0.5), ("income", 2.0)]),
            1.0,
        );
        // 1.0 + 0.5 * 10 + 2.0 * 3 = 12.0; absent weight features score zero.
        let inputs = vec![features(&[("age", 10.0), ("income", 3.0), ("noise", 99.0)])];
        let predictions = predictor.predict(&inputs).await.unwrap();
        assert_eq!(predictions, vec![12.0]);
    }

    #[tokio::test]
    async fn test_heuristic_rejects_empty_vector() {
        let predictor = HeuristicPredictor::new();
        let err = predictor.predict(&[FeatureVector::default()]).await.unwrap_err();
        assert!(matches!(err, PredictError::InvalidInput(_)));
    }

    #[test]
    fn test_predictor_kinds() {
        assert_eq!(HeuristicPredictor::new().kind(), "heuristic");
    }
}
