/// Property-based tests using proptest
/// Invariants of classification and input normalization that hold for all inputs
use proptest::prelude::*;
use rust_recon_api::classifier::{classify, AUTO_ACCEPT_THRESHOLD, MANUAL_REVIEW_THRESHOLD};
use rust_recon_api::ingestion::{normalize_header, parse_amount, parse_date};
use rust_recon_api::models::{ConfidenceLevel, Recommendation};
use rust_recon_api::pairing::blocking_key;

fn rank(recommendation: Recommendation) -> u8 {
    match recommendation {
        Recommendation::LikelyNoMatch => 0,
        Recommendation::ManualReview => 1,
        Recommendation::AutoAccept => 2,
    }
}

// Property: every probability maps to exactly one consistent disposition
proptest! {
    #[test]
    fn classification_is_total(p in proptest::num::f64::ANY) {
        let (recommendation, confidence) = classify(p);
        let expected = match recommendation {
            Recommendation::AutoAccept => ConfidenceLevel::High,
            Recommendation::ManualReview => ConfidenceLevel::Medium,
            Recommendation::LikelyNoMatch => ConfidenceLevel::Low,
        };
        prop_assert_eq!(confidence, expected);
    }

    #[test]
    fn classification_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(classify(low).0) <= rank(classify(high).0));
    }

    #[test]
    fn classification_matches_thresholds(p in 0.0f64..=1.0) {
        let (recommendation, _) = classify(p);
        if p >= AUTO_ACCEPT_THRESHOLD {
            prop_assert_eq!(recommendation, Recommendation::AutoAccept);
        } else if p >= MANUAL_REVIEW_THRESHOLD {
            prop_assert_eq!(recommendation, Recommendation::ManualReview);
        } else {
            prop_assert_eq!(recommendation, Recommendation::LikelyNoMatch);
        }
    }
}

// Property: amount and date parsing never panic and stay well-formed
proptest! {
    #[test]
    fn amount_parsing_never_panics(raw in "\\PC*") {
        let amount = parse_amount(Some(&raw));
        prop_assert!(amount.is_finite());
    }

    #[test]
    fn formatted_amounts_parse_back(cents in 0u64..100_000_000u64) {
        let dollars = cents / 100;
        let raw = format!("${},{:03}.{:02}", dollars / 1000, dollars % 1000, cents % 100);
        let expected = cents as f64 / 100.0;
        prop_assert!((parse_amount(Some(&raw)) - expected).abs() < 1e-6);
    }

    #[test]
    fn date_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_date(Some(&raw));
    }

    #[test]
    fn iso_dates_round_trip(year in 1990i32..2090, month in 1u32..=12, day in 1u32..=28) {
        let raw = format!("{:04}-{:02}-{:02}", year, month, day);
        let parsed = parse_date(Some(&raw));
        prop_assert!(parsed.is_some());
        prop_assert_eq!(parsed.unwrap().format("%Y-%m-%d").to_string(), raw);
    }
}

// Property: header and name keys are stable under re-normalization
proptest! {
    #[test]
    fn header_normalization_is_idempotent(raw in "[ -~]{0,40}") {
        let once = normalize_header(&raw);
        prop_assert_eq!(normalize_header(&once), once.clone());
        prop_assert!(!once.chars().any(char::is_whitespace));
    }

    #[test]
    fn blocking_key_ignores_token_order(first in "[A-Za-z]{1,12}", last in "[A-Za-z]{1,12}") {
        let forward = blocking_key(&format!("{} {}", first, last));
        let reversed = blocking_key(&format!("{}, {}", last.to_uppercase(), first));
        prop_assert_eq!(forward, reversed);
    }

    #[test]
    fn blocking_key_is_idempotent(raw in "[A-Za-z0-9 ,.'-]{0,40}") {
        let once = blocking_key(&raw);
        prop_assert_eq!(blocking_key(&once), once);
    }
}
