use crate::circuit_breaker::ResilienceGuard;
use crate::classifier::classify;
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    BatchScore, PairDisposition, PairResult, ScoreResult, ScorerPair, TransactionPair,
};
use crate::score_cache::ScoreCache;
use crate::scoring_client::{check_probability, ScoringClient};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const CANCELLED_REASON: &str = "cancelled";

/// One `/predict` call per pair, or one `/batch-predict` call per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    Single,
    Batch,
}

impl FromStr for ScoringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(ScoringMode::Single),
            "batch" => Ok(ScoringMode::Batch),
            other => Err(format!("Unknown scoring mode: {}", other)),
        }
    }
}

/// Cooperative cancellation shared between a job and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scores pairs through the resilience guard and classifies each answer.
///
/// Pairs are processed sequentially and returned in input order. A failed call
/// marks the affected pairs `ScoringFailed` and processing moves on.
#[derive(Clone)]
pub struct ScoringOrchestrator {
    client: ScoringClient,
    guard: Arc<ResilienceGuard>,
    cache: Option<ScoreCache>,
    mode: ScoringMode,
    batch_size: usize,
    threshold: f64,
}

impl ScoringOrchestrator {
    pub fn new(client: ScoringClient, guard: Arc<ResilienceGuard>, threshold: f64) -> Self {
        Self {
            client,
            guard,
            cache: None,
            mode: ScoringMode::Batch,
            batch_size: 100,
            threshold,
        }
    }

    /// Client, cache, mode and threshold as configured; the guard is shared.
    pub fn from_config(config: &Config, guard: Arc<ResilienceGuard>) -> Result<Self, AppError> {
        let client = ScoringClient::new(config.scoring_api_url.clone(), config.scoring_timeout())?;
        Ok(Self::new(client, guard, config.match_threshold)
            .with_cache(ScoreCache::new(config.score_cache_ttl(), 100_000))
            .with_mode(config.scoring_mode, config.scoring_batch_size))
    }

    pub fn with_cache(mut self, cache: ScoreCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_mode(mut self, mode: ScoringMode, batch_size: usize) -> Self {
        self.mode = mode;
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn client(&self) -> &ScoringClient {
        &self.client
    }

    /// Score one pair through the guard without touching any job.
    pub async fn score_one(&self, pair: &ScorerPair) -> Result<ScoreResult, AppError> {
        self.fetch_single(pair).await
    }

    pub async fn score_pairs(
        &self,
        pairs: Vec<TransactionPair>,
        cancel: &CancellationFlag,
    ) -> Vec<PairResult> {
        tracing::info!(
            "Scoring {} pairs ({:?} mode, threshold {})",
            pairs.len(),
            self.mode,
            self.threshold
        );
        match self.mode {
            ScoringMode::Single => self.score_individually(pairs, cancel).await,
            ScoringMode::Batch => self.score_in_batches(pairs, cancel).await,
        }
    }

    async fn score_individually(
        &self,
        pairs: Vec<TransactionPair>,
        cancel: &CancellationFlag,
    ) -> Vec<PairResult> {
        let mut results = Vec::with_capacity(pairs.len());

        for pair in pairs {
            if cancel.is_cancelled() {
                results.push(failed(pair, CANCELLED_REASON.to_string()));
                continue;
            }

            let scorer_pair = ScorerPair::from(&pair);
            let disposition = match self
                .fetch_single(&scorer_pair)
                .await
                .with_context(|| format!("Pair {}", pair.pair_index))
            {
                Ok(score) => scored(score),
                Err(e) => {
                    if matches!(e.root(), AppError::ServiceUnavailable { .. }) {
                        tracing::debug!("{}", e);
                    } else {
                        tracing::warn!("{}", e);
                    }
                    PairDisposition::ScoringFailed {
                        reason: e.to_string(),
                    }
                }
            };
            results.push(PairResult {
                pair,
                disposition,
                review_item_id: None,
            });
        }

        results
    }

    async fn fetch_single(&self, scorer_pair: &ScorerPair) -> Result<ScoreResult, AppError> {
        if let Some(cached) = self.cached(scorer_pair).await {
            return Ok(cached);
        }

        let score = self
            .guard
            .call(|| self.client.predict(scorer_pair, self.threshold))
            .await?;

        if let Some(cache) = &self.cache {
            cache.insert(scorer_pair, self.threshold, &score).await;
        }
        Ok(score)
    }

    async fn cached(&self, scorer_pair: &ScorerPair) -> Option<ScoreResult> {
        match &self.cache {
            Some(cache) => cache.get(scorer_pair, self.threshold).await,
            None => None,
        }
    }

    async fn score_in_batches(
        &self,
        pairs: Vec<TransactionPair>,
        cancel: &CancellationFlag,
    ) -> Vec<PairResult> {
        let mut results = Vec::with_capacity(pairs.len());
        let mut remaining = pairs.into_iter().peekable();

        while remaining.peek().is_some() {
            let chunk: Vec<TransactionPair> = remaining.by_ref().take(self.batch_size).collect();

            if cancel.is_cancelled() {
                results.extend(
                    chunk
                        .into_iter()
                        .map(|pair| failed(pair, CANCELLED_REASON.to_string())),
                );
                continue;
            }

            results.extend(self.score_chunk(chunk).await);
        }

        results
    }

    async fn score_chunk(&self, chunk: Vec<TransactionPair>) -> Vec<PairResult> {
        let scorer_pairs: Vec<ScorerPair> = chunk.iter().map(ScorerPair::from).collect();

        let mut outcomes: Vec<Option<Result<ScoreResult, String>>> =
            Vec::with_capacity(chunk.len());
        for scorer_pair in &scorer_pairs {
            outcomes.push(self.cached(scorer_pair).await.map(Ok));
        }

        let misses: Vec<usize> = (0..chunk.len()).filter(|i| outcomes[*i].is_none()).collect();

        if !misses.is_empty() {
            let request: Vec<ScorerPair> =
                misses.iter().map(|i| scorer_pairs[*i].clone()).collect();

            let answered = self
                .guard
                .call(|| self.client.batch_predict(&request, self.threshold))
                .await
                .and_then(|batch| assign_batch(batch, request.len()));

            match answered {
                Ok(assigned) => {
                    for (slot, outcome) in misses.iter().zip(assigned) {
                        if let (Ok(score), Some(cache)) = (&outcome, &self.cache) {
                            cache.insert(&scorer_pairs[*slot], self.threshold, score).await;
                        }
                        outcomes[*slot] = Some(outcome);
                    }
                }
                Err(e) => {
                    tracing::warn!("Batch of {} pairs failed: {}", request.len(), e);
                    let reason = e.to_string();
                    for slot in &misses {
                        outcomes[*slot] = Some(Err(reason.clone()));
                    }
                }
            }
        }

        chunk
            .into_iter()
            .zip(outcomes)
            .map(|(pair, outcome)| match outcome {
                Some(Ok(score)) => PairResult {
                    pair,
                    disposition: scored(score),
                    review_item_id: None,
                },
                Some(Err(reason)) => failed(pair, reason),
                None => failed(pair, "No score returned".to_string()),
            })
            .collect()
    }
}

/// Match batch entries to request positions.
///
/// Entries carrying `pair_index` are placed by it; pairs nobody answered fail
/// individually. Without indexes the answer is only trusted when the counts
/// agree, and any other shape fails the whole batch. Out-of-range
/// probabilities fail only their own pair.
pub fn assign_batch(
    batch: Vec<BatchScore>,
    expected: usize,
) -> Result<Vec<Result<ScoreResult, String>>, AppError> {
    let indexed = batch.iter().filter(|entry| entry.pair_index.is_some()).count();

    let placed: Vec<Option<ScoreResult>> = if indexed == 0 {
        if batch.len() != expected {
            return Err(AppError::ScoringRejected(format!(
                "Scoring service returned {} results for {} pairs",
                batch.len(),
                expected
            )));
        }
        batch.into_iter().map(|entry| Some(entry.score)).collect()
    } else if indexed == batch.len() {
        let mut placed: Vec<Option<ScoreResult>> = vec![None; expected];
        for entry in batch {
            let Some(index) = entry.pair_index else {
                continue;
            };
            if index >= expected {
                return Err(AppError::ScoringRejected(format!(
                    "Scoring service returned pair_index {} for a batch of {}",
                    index, expected
                )));
            }
            if placed[index].is_some() {
                return Err(AppError::ScoringRejected(format!(
                    "Scoring service returned pair_index {} twice",
                    index
                )));
            }
            placed[index] = Some(entry.score);
        }
        placed
    } else {
        return Err(AppError::ScoringRejected(
            "Scoring service mixed indexed and unindexed results".to_string(),
        ));
    };

    Ok(placed
        .into_iter()
        .map(|score| match score {
            Some(score) => check_probability(score).map_err(|e| e.to_string()),
            None => Err("Scoring service returned no result for this pair".to_string()),
        })
        .collect())
}

fn scored(score: ScoreResult) -> PairDisposition {
    let (recommendation, confidence_level) = classify(score.match_probability);
    PairDisposition::Scored {
        score,
        recommendation,
        confidence_level,
    }
}

fn failed(pair: TransactionPair, reason: String) -> PairResult {
    PairResult {
        pair,
        disposition: PairDisposition::ScoringFailed { reason },
        review_item_id: None,
    }
}
