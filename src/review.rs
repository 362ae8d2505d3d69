use crate::errors::AppError;
use crate::models::{
    ReviewDecision, ReviewItem, ReviewState, ReviewSubmission, ScoreResult, TransactionPair,
};
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

const DEFAULT_REVIEWER: &str = "reviewer";

/// Manual-review items across all jobs.
///
/// `Pending -> Approved | Rejected`, nothing else. Decisions on the same item are
/// serialized by the map's entry lock.
#[derive(Debug, Default)]
pub struct ReviewQueue {
    items: DashMap<Uuid, ReviewItem>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pending item for a pair classified as Manual Review.
    pub fn enqueue(&self, job_id: Uuid, pair: TransactionPair, score: ScoreResult) -> Uuid {
        let item = ReviewItem {
            id: Uuid::new_v4(),
            job_id,
            pair,
            score,
            state: ReviewState::Pending,
            notes: None,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
        };
        let id = item.id;
        self.items.insert(id, item);
        id
    }

    /// Apply a reviewer decision.
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown id.
    /// * `ReviewConflictError` - the item already has a decision; it is left untouched.
    pub fn decide(&self, submission: ReviewSubmission) -> Result<ReviewItem, AppError> {
        let mut item = self.items.get_mut(&submission.match_id).ok_or_else(|| {
            AppError::NotFound(format!("Review item {} not found", submission.match_id))
        })?;

        if item.state.is_terminal() {
            return Err(AppError::ReviewConflictError(format!(
                "Review item {} is already {}",
                item.id,
                item.state.as_str()
            )));
        }

        item.state = match submission.decision {
            ReviewDecision::Approve => ReviewState::Approved,
            ReviewDecision::Reject => ReviewState::Rejected,
        };
        item.notes = submission.notes;
        item.decided_by = Some(
            submission
                .reviewer
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REVIEWER.to_string()),
        );
        item.decided_at = Some(Utc::now());

        tracing::info!(
            "Review item {} (job {}) {} by {}",
            item.id,
            item.job_id,
            item.state.as_str(),
            item.decided_by.as_deref().unwrap_or(DEFAULT_REVIEWER)
        );

        Ok(item.clone())
    }

    pub fn get(&self, id: &Uuid) -> Option<ReviewItem> {
        self.items.get(id).map(|item| item.clone())
    }

    /// Items of one job, ordered by pair index.
    pub fn list_for_job(&self, job_id: &Uuid) -> Vec<ReviewItem> {
        let mut items: Vec<ReviewItem> = self
            .items
            .iter()
            .filter(|entry| entry.job_id == *job_id)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| item.pair.pair_index);
        items
    }
}
