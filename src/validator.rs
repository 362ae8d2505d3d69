use crate::errors::AppError;
use crate::models::Transaction;

/// Outcome of validating one file's transactions. Both partitions are always present.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid_transactions: Vec<Transaction>,
    /// One `ValidationError` per rejected row.
    pub errors: Vec<AppError>,
}

impl ValidationOutcome {
    pub fn valid_count(&self) -> usize {
        self.valid_transactions.len()
    }
}

/// Reasons a single transaction fails validation, in a fixed order.
pub fn row_defects(txn: &Transaction) -> Vec<&'static str> {
    let mut defects = Vec::new();
    if txn.customer_name.trim().chars().count() < 2 {
        defects.push("Invalid customer name");
    }
    if !(txn.amount > 0.0) {
        defects.push("Invalid amount");
    }
    if txn.service.trim().chars().count() < 2 {
        defects.push("Invalid service description");
    }
    if txn.date.is_none() {
        defects.push("Invalid date");
    }
    defects
}

/// Partition transactions into valid ones and `Row <n>: <reasons>` messages.
///
/// Row numbers are 1-indexed positions in the input slice.
pub fn validate_transactions(transactions: Vec<Transaction>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for (index, txn) in transactions.into_iter().enumerate() {
        let defects = row_defects(&txn);
        if defects.is_empty() {
            outcome.valid_transactions.push(txn);
        } else {
            outcome.errors.push(AppError::ValidationError(format!(
                "Row {}: {}",
                index + 1,
                defects.join(", ")
            )));
        }
    }

    if !outcome.errors.is_empty() {
        tracing::debug!(
            "Validation rejected {} of {} rows",
            outcome.errors.len(),
            outcome.errors.len() + outcome.valid_transactions.len()
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceSystem;
    use chrono::Utc;

    fn messages(outcome: &ValidationOutcome) -> Vec<String> {
        outcome
            .errors
            .iter()
            .map(|e| match e {
                AppError::ValidationError(msg) => msg.clone(),
                other => panic!("Expected ValidationError, got {:?}", other),
            })
            .collect()
    }

    fn txn(name: &str, amount: f64, service: &str) -> Transaction {
        Transaction {
            id: "pos_0_0".to_string(),
            customer_name: name.to_string(),
            amount,
            date: Some(Utc::now()),
            service: service.to_string(),
            source_system: SourceSystem::Pos,
            phone: None,
            email: None,
            provider: None,
            source_transaction_id: None,
            certificate_id: None,
            points_earned: None,
            payment_method: None,
            treatment_notes: None,
        }
    }

    #[test]
    fn test_valid_rows_pass_through_in_order() {
        let outcome = validate_transactions(vec![
            txn("John Doe", 100.0, "Botox"),
            txn("Jane Roe", 50.0, "Filler"),
        ]);
        assert_eq!(outcome.valid_count(), 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.valid_transactions[1].customer_name, "Jane Roe");
    }

    #[test]
    fn test_zero_amount_reports_row_number() {
        let outcome = validate_transactions(vec![
            txn("John Doe", 100.0, "Botox"),
            txn("Jane Roe", 0.0, "Filler"),
        ]);
        assert_eq!(outcome.valid_count(), 1);
        assert_eq!(messages(&outcome), vec!["Row 2: Invalid amount".to_string()]);
    }

    #[test]
    fn test_multiple_defects_are_joined() {
        let mut bad = txn("J", -5.0, "X");
        bad.date = None;
        let outcome = validate_transactions(vec![bad]);
        assert_eq!(
            messages(&outcome),
            vec![
                "Row 1: Invalid customer name, Invalid amount, Invalid service description, Invalid date"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_nan_amount_is_invalid() {
        assert_eq!(row_defects(&txn("John Doe", f64::NAN, "Botox")), vec!["Invalid amount"]);
    }
}
