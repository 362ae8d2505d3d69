use crate::models::{ScoreResult, ScorerPair};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Cached score with a SHA-256 checksum of its JSON, checked on every read so a
/// corrupted entry falls back to a fresh scorer call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedScore {
    pub data: String,
    pub checksum: String,
}

impl ValidatedScore {
    pub fn new(data: String) -> Self {
        let checksum = sha256_hex(data.as_bytes());
        Self { data, checksum }
    }

    pub fn is_valid(&self) -> bool {
        sha256_hex(self.data.as_bytes()) == self.checksum
    }

    /// Returns the score if the checksum still matches.
    pub fn decode(&self) -> Option<ScoreResult> {
        if !self.is_valid() {
            tracing::warn!(
                "Score cache entry failed checksum validation ({} bytes), ignoring",
                self.data.len()
            );
            return None;
        }
        serde_json::from_str(&self.data).ok()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of exactly what the scorer sees for a pair at a given threshold.
pub fn fingerprint(pair: &ScorerPair, threshold: f64) -> String {
    let payload = serde_json::to_string(pair).unwrap_or_default();
    sha256_hex(format!("{}|{}", threshold, payload).as_bytes())
}

/// TTL cache of successful scores keyed by pair fingerprint.
#[derive(Clone)]
pub struct ScoreCache {
    entries: Cache<String, ValidatedScore>,
}

impl ScoreCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn get(&self, pair: &ScorerPair, threshold: f64) -> Option<ScoreResult> {
        let key = fingerprint(pair, threshold);
        let entry = self.entries.get(&key).await?;
        match entry.decode() {
            Some(score) => Some(score),
            None => {
                self.entries.invalidate(&key).await;
                None
            }
        }
    }

    pub async fn insert(&self, pair: &ScorerPair, threshold: f64, score: &ScoreResult) {
        if let Ok(json) = serde_json::to_string(score) {
            self.entries
                .insert(fingerprint(pair, threshold), ValidatedScore::new(json))
                .await;
        }
    }
}
