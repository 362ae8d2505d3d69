use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Source Data ============

/// The system an uploaded export came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    /// Practice point-of-sale system.
    Pos,
    /// Allē rewards program.
    Alle,
    /// Aspire rewards program.
    Aspire,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Pos => "pos",
            SourceSystem::Alle => "alle",
            SourceSystem::Aspire => "aspire",
        }
    }

    /// Rewards-side sources are paired against POS.
    pub fn is_reward(&self) -> bool {
        !matches!(self, SourceSystem::Pos)
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pos" | "pos_transactions" => Ok(SourceSystem::Pos),
            "alle" | "alle_rewards" => Ok(SourceSystem::Alle),
            "aspire" | "aspire_rewards" => Ok(SourceSystem::Aspire),
            other => Err(format!("Unknown source type: {}", other)),
        }
    }
}

/// One parsed line from an uploaded file, before normalization.
///
/// Column names are already normalized (trimmed, lowercased, spaces → `_`).
#[derive(Debug, Clone)]
pub struct RawRow {
    /// Name of the file the row came from.
    pub source_file: String,
    /// Zero-based data row index (header excluded).
    pub row_index: usize,
    /// Ordered column → value pairs.
    pub columns: Vec<(String, String)>,
}

impl RawRow {
    /// Returns the value of a column, if present and non-blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns the first non-blank value among the given aliases.
    pub fn first_of(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| self.get(alias))
    }
}

/// Canonical, source-tagged financial event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub customer_name: String,
    pub amount: f64,
    /// Empty only when strict date parsing rejected the cell.
    pub date: Option<DateTime<Utc>>,
    pub service: String,
    pub source_system: SourceSystem,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub provider: Option<String>,
    pub source_transaction_id: Option<String>,
    pub certificate_id: Option<String>,
    pub points_earned: Option<i64>,
    pub payment_method: Option<String>,
    pub treatment_notes: Option<String>,
}

/// A reward-side and a POS-side transaction proposed as a candidate match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPair {
    pub pair_index: usize,
    pub reward_transaction: Transaction,
    pub pos_transaction: Transaction,
}

// ============ Scoring ============

/// Output of the external scorer for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Probability in [0, 1] that the pair is the same real-world transaction.
    pub match_probability: f64,
    /// Named sub-scores (name similarity, amount delta, ...).
    #[serde(default)]
    pub feature_analysis: BTreeMap<String, f64>,
    /// Label as reported by the scorer. Informational only.
    #[serde(default)]
    pub confidence_level: Option<String>,
    /// Recommendation as reported by the scorer. Informational only.
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Disposition assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Likely No Match")]
    LikelyNoMatch,
    #[serde(rename = "Manual Review")]
    ManualReview,
    #[serde(rename = "Auto-Accept")]
    AutoAccept,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::AutoAccept => "Auto-Accept",
            Recommendation::ManualReview => "Manual Review",
            Recommendation::LikelyNoMatch => "Likely No Match",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved outcome of scoring one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairDisposition {
    Scored {
        score: ScoreResult,
        recommendation: Recommendation,
        confidence_level: ConfidenceLevel,
    },
    /// Guard rejection, scorer error or cancellation. Surfaced as "needs retry".
    ScoringFailed { reason: String },
}

impl PairDisposition {
    pub fn recommendation(&self) -> Option<Recommendation> {
        match self {
            PairDisposition::Scored { recommendation, .. } => Some(*recommendation),
            PairDisposition::ScoringFailed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PairDisposition::ScoringFailed { .. })
    }

    /// Label used in summaries and exports.
    pub fn label(&self) -> &'static str {
        match self {
            PairDisposition::Scored { recommendation, .. } => recommendation.as_str(),
            PairDisposition::ScoringFailed { .. } => "Scoring Failed",
        }
    }
}

/// Final per-pair row of a job, in orchestrator output order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairResult {
    pub pair: TransactionPair,
    pub disposition: PairDisposition,
    /// Set when the pair was routed to manual review.
    pub review_item_id: Option<Uuid>,
}

// ============ Manual Review ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    Pending,
    Approved,
    Rejected,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "Pending",
            ReviewState::Approved => "Approved",
            ReviewState::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// A pair awaiting (or holding) a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub pair: TransactionPair,
    pub score: ScoreResult,
    pub state: ReviewState,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/v1/reconciliation/review`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewSubmission {
    #[serde(rename = "matchId")]
    pub match_id: Uuid,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

// ============ Resilience ============

/// Snapshot of the scorer's health and circuit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
}

// ============ Jobs ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-file ingestion outcome reported on the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFileSummary {
    pub file_name: String,
    pub source_system: SourceSystem,
    pub total_rows: usize,
    pub valid_rows: usize,
}

/// Disposition counts for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total: usize,
    pub auto_accept: usize,
    pub manual_review: usize,
    pub likely_no_match: usize,
    pub scoring_failed: usize,
    pub review_pending: usize,
    pub review_approved: usize,
    pub review_rejected: usize,
}

/// One end-to-end run over an uploaded file set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationJob {
    pub job_id: Uuid,
    pub input_files: Vec<InputFileSummary>,
    pub status: JobStatus,
    pub summary: Option<ResultsSummary>,
    pub results: Vec<PairResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReconciliationJob {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            input_files: Vec::new(),
            status: JobStatus::Uploaded,
            summary: None,
            results: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ============ Scoring API Wire Types ============

/// Transaction shape the scoring service expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerTransaction {
    pub customer_name: String,
    pub service: String,
    pub amount: f64,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl From<&Transaction> for ScorerTransaction {
    fn from(t: &Transaction) -> Self {
        Self {
            customer_name: t.customer_name.clone(),
            service: t.service.clone(),
            amount: t.amount,
            date: t
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            phone: t.phone.clone(),
            email: t.email.clone(),
            provider: t.provider.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerPair {
    pub reward_transaction: ScorerTransaction,
    pub pos_transaction: ScorerTransaction,
}

impl From<&TransactionPair> for ScorerPair {
    fn from(pair: &TransactionPair) -> Self {
        Self {
            reward_transaction: (&pair.reward_transaction).into(),
            pos_transaction: (&pair.pos_transaction).into(),
        }
    }
}

/// Body of `POST /predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub reward_transaction: ScorerTransaction,
    pub pos_transaction: ScorerTransaction,
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<ScoreResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /batch-predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub transaction_pairs: Vec<ScorerPair>,
    pub threshold: f64,
}

/// One entry of a `/batch-predict` answer.
///
/// `pair_index` is the position of the pair in the request, when the scorer
/// reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchScore {
    #[serde(default)]
    pub pair_index: Option<usize>,
    #[serde(flatten)]
    pub score: ScoreResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchPredictResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<BatchScore>,
    #[serde(default)]
    pub error: Option<String>,
}
