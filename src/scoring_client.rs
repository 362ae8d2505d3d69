use crate::errors::AppError;
use crate::models::{
    BatchPredictRequest, BatchPredictResponse, BatchScore, PredictRequest, PredictResponse,
    ScoreResult, ScorerPair,
};
use std::time::Duration;

/// Typed HTTP client for the external match-scoring service.
///
/// Transport problems (connect errors, timeouts, non-2xx, unreadable bodies) map
/// to `ScoringServiceError`; a well-formed `{"success": false}` answer maps to
/// `ScoringRejected`.
#[derive(Clone, Debug)]
pub struct ScoringClient {
    client: reqwest::Client,
    base_url: String,
}

impl ScoringClient {
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the scoring service, without trailing slash.
    /// * `timeout` - Per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create scoring client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Score one pair via `POST /predict`.
    pub async fn predict(&self, pair: &ScorerPair, threshold: f64) -> Result<ScoreResult, AppError> {
        let url = format!("{}/predict", self.base_url);
        let body = PredictRequest {
            reward_transaction: pair.reward_transaction.clone(),
            pos_transaction: pair.pos_transaction.clone(),
            threshold,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ScoringServiceError(format!("Predict request failed: {}", e)))?;
        let response = ensure_success(response, "predict").await?;

        let parsed: PredictResponse = response.json().await.map_err(|e| {
            AppError::ScoringServiceError(format!("Failed to parse predict response: {}", e))
        })?;

        if !parsed.success {
            return Err(AppError::ScoringRejected(
                parsed
                    .error
                    .unwrap_or_else(|| "Scoring service reported failure".to_string()),
            ));
        }

        let score = parsed.result.ok_or_else(|| {
            AppError::ScoringRejected("Predict response missing result".to_string())
        })?;
        check_probability(score)
    }

    /// Score a chunk of pairs via `POST /batch-predict`.
    ///
    /// Entries are returned as sent by the scorer. Matching them to pairs, and
    /// range-checking each probability, is left to the caller.
    pub async fn batch_predict(
        &self,
        pairs: &[ScorerPair],
        threshold: f64,
    ) -> Result<Vec<BatchScore>, AppError> {
        let url = format!("{}/batch-predict", self.base_url);
        let body = BatchPredictRequest {
            transaction_pairs: pairs.to_vec(),
            threshold,
        };

        tracing::debug!("Sending batch of {} pairs to {}", pairs.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::ScoringServiceError(format!("Batch predict request failed: {}", e))
            })?;
        let response = ensure_success(response, "batch-predict").await?;

        let parsed: BatchPredictResponse = response.json().await.map_err(|e| {
            AppError::ScoringServiceError(format!("Failed to parse batch response: {}", e))
        })?;

        if !parsed.success {
            return Err(AppError::ScoringRejected(
                parsed
                    .error
                    .unwrap_or_else(|| "Batch scoring reported failure".to_string()),
            ));
        }

        Ok(parsed.results)
    }

    /// `GET /health`. Any 2xx counts as healthy.
    pub async fn health(&self) -> Result<(), AppError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ScoringServiceError(format!("Health check failed: {}", e)))?;
        ensure_success(response, "health").await?;
        Ok(())
    }
}

/// Reject probabilities outside `[0, 1]`, including NaN.
pub fn check_probability(score: ScoreResult) -> Result<ScoreResult, AppError> {
    if (0.0..=1.0).contains(&score.match_probability) {
        Ok(score)
    } else {
        Err(AppError::ScoringRejected(format!(
            "match_probability {} is outside [0, 1]",
            score.match_probability
        )))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, AppError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(AppError::ScoringServiceError(format!(
        "Scoring service {} returned {}: {}",
        operation, status, error_text
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(p: f64) -> ScoreResult {
        ScoreResult {
            match_probability: p,
            feature_analysis: Default::default(),
            confidence_level: None,
            recommendation: None,
        }
    }

    #[test]
    fn test_probability_range_is_enforced() {
        assert!(check_probability(score(0.0)).is_ok());
        assert!(check_probability(score(1.0)).is_ok());
        for bad in [42.0, -0.01, 1.0001, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                check_probability(score(bad)),
                Err(AppError::ScoringRejected(_))
            ));
        }
    }
}
