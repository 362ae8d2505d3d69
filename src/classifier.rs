use crate::models::{ConfidenceLevel, Recommendation};

pub const AUTO_ACCEPT_THRESHOLD: f64 = 0.95;
pub const MANUAL_REVIEW_THRESHOLD: f64 = 0.80;

/// Map a match probability to a disposition and confidence label.
///
/// Total over every `f64`; NaN and anything below the review threshold is
/// Likely No Match.
pub fn classify(match_probability: f64) -> (Recommendation, ConfidenceLevel) {
    if match_probability >= AUTO_ACCEPT_THRESHOLD {
        (Recommendation::AutoAccept, ConfidenceLevel::High)
    } else if match_probability >= MANUAL_REVIEW_THRESHOLD {
        (Recommendation::ManualReview, ConfidenceLevel::Medium)
    } else {
        (Recommendation::LikelyNoMatch, ConfidenceLevel::Low)
    }
}
