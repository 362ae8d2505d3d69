use crate::ingestion::DateFallback;
use crate::orchestrator::ScoringMode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub scoring_api_url: String,
    pub scoring_timeout_secs: u64,
    pub match_threshold: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
    pub health_check_interval_secs: u64,
    pub scoring_batch_size: usize,
    pub max_upload_bytes: usize,
    pub max_transactions_per_job: usize,
    pub pairing_date_window_days: i64,
    pub score_cache_ttl_secs: u64,
    /// Reject unparsable dates instead of defaulting them to now.
    pub strict_dates: bool,
    pub scoring_mode: ScoringMode,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            scoring_api_url: std::env::var("SCORING_API_URL")
                .or_else(|_| std::env::var("AI_API_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("SCORING_API_URL or AI_API_URL environment variable required")
                })
                .and_then(|raw| {
                    if raw.trim().is_empty() {
                        anyhow::bail!("SCORING_API_URL cannot be empty");
                    }
                    if !raw.starts_with("http://") && !raw.starts_with("https://") {
                        anyhow::bail!("SCORING_API_URL must start with http:// or https://");
                    }
                    url::Url::parse(&raw)
                        .map_err(|e| anyhow::anyhow!("SCORING_API_URL is not a valid URL: {}", e))?;
                    Ok(raw.trim_end_matches('/').to_string())
                })?,
            scoring_timeout_secs: env_or("SCORING_TIMEOUT_SECS", 30u64).and_then(|secs| {
                if !(5..=30).contains(&secs) {
                    anyhow::bail!("SCORING_TIMEOUT_SECS must be between 5 and 30");
                }
                Ok(secs)
            })?,
            match_threshold: env_or("MATCH_THRESHOLD", 0.95f64).and_then(|t| {
                if !(0.0..=1.0).contains(&t) {
                    anyhow::bail!("MATCH_THRESHOLD must be between 0 and 1");
                }
                Ok(t)
            })?,
            circuit_failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", 3u32).and_then(|n| {
                if n == 0 {
                    anyhow::bail!("CIRCUIT_FAILURE_THRESHOLD must be at least 1");
                }
                Ok(n)
            })?,
            circuit_cooldown_secs: env_or("CIRCUIT_COOLDOWN_SECS", 60u64)?,
            health_check_interval_secs: env_or("HEALTH_CHECK_INTERVAL_SECS", 30u64)?,
            scoring_batch_size: env_or("SCORING_BATCH_SIZE", 100usize).and_then(|n| {
                if n == 0 {
                    anyhow::bail!("SCORING_BATCH_SIZE must be at least 1");
                }
                Ok(n)
            })?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
            max_transactions_per_job: env_or("MAX_TRANSACTIONS_PER_JOB", 10_000usize)?,
            pairing_date_window_days: env_or("PAIRING_DATE_WINDOW_DAYS", 3i64)?,
            score_cache_ttl_secs: env_or("SCORE_CACHE_TTL_SECS", 3600u64)?,
            strict_dates: env_or("STRICT_DATES", false)?,
            scoring_mode: env_or("SCORING_MODE", ScoringMode::Batch)?,
        };

        // Log successful configuration load
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Scoring API URL: {}", config.scoring_api_url);
        tracing::debug!(
            "Circuit breaker: {} failures, {}s cooldown",
            config.circuit_failure_threshold,
            config.circuit_cooldown_secs
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Defaults used by tests and the offline runner; only the scorer URL varies.
    pub fn with_scoring_url(scoring_api_url: impl Into<String>) -> Self {
        Self {
            port: 3000,
            scoring_api_url: scoring_api_url.into(),
            scoring_timeout_secs: 30,
            match_threshold: 0.95,
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
            health_check_interval_secs: 30,
            scoring_batch_size: 100,
            max_upload_bytes: 10 * 1024 * 1024,
            max_transactions_per_job: 10_000,
            pairing_date_window_days: 3,
            score_cache_ttl_secs: 3600,
            strict_dates: false,
            scoring_mode: ScoringMode::Batch,
        }
    }

    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_secs(self.scoring_timeout_secs)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn score_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.score_cache_ttl_secs)
    }

    pub fn date_fallback(&self) -> DateFallback {
        if self.strict_dates {
            DateFallback::Reject
        } else {
            DateFallback::Now
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::with_scoring_url("http://localhost:8000");
        assert_eq!(config.match_threshold, 0.95);
        assert_eq!(config.circuit_failure_threshold, 3);
        assert_eq!(config.circuit_cooldown(), Duration::from_secs(60));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.date_fallback(), DateFallback::Now);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("RECON_TEST_BATCH_SIZE", "lots");
        assert!(env_or("RECON_TEST_BATCH_SIZE", 100usize).is_err());
        std::env::set_var("RECON_TEST_BATCH_SIZE", " 25 ");
        assert_eq!(env_or("RECON_TEST_BATCH_SIZE", 100usize).unwrap(), 25);
        std::env::remove_var("RECON_TEST_BATCH_SIZE");
        assert_eq!(env_or("RECON_TEST_BATCH_SIZE", 100usize).unwrap(), 100);
    }
}
