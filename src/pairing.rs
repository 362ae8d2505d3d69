use crate::models::{Transaction, TransactionPair};
use std::cmp::Ordering;

/// Pairs produced from one reward set and one POS set.
#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    /// Indexed in reward input order.
    pub pairs: Vec<TransactionPair>,
    pub unpaired_rewards: Vec<Transaction>,
    pub unused_pos: usize,
}

/// How reward-side transactions are matched up with POS candidates.
pub trait PairingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build candidate pairs. Each POS transaction appears in at most one pair.
    fn pair(&self, rewards: &[Transaction], pos: &[Transaction]) -> PairingOutcome;
}

/// Zip by aligned row index. Extra rows on either side stay unpaired.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalPairing;

impl PairingStrategy for PositionalPairing {
    fn name(&self) -> &'static str {
        "positional"
    }

    fn pair(&self, rewards: &[Transaction], pos: &[Transaction]) -> PairingOutcome {
        let pairs: Vec<TransactionPair> = rewards
            .iter()
            .zip(pos.iter())
            .enumerate()
            .map(|(pair_index, (reward, pos))| TransactionPair {
                pair_index,
                reward_transaction: reward.clone(),
                pos_transaction: pos.clone(),
            })
            .collect();

        PairingOutcome {
            unpaired_rewards: rewards.iter().skip(pairs.len()).cloned().collect(),
            unused_pos: pos.len().saturating_sub(pairs.len()),
            pairs,
        }
    }
}

/// Candidates share a customer-name blocking key and fall inside a date window;
/// the closest date wins, then the smallest amount difference.
#[derive(Debug, Clone, Copy)]
pub struct BlockingPairing {
    pub date_window_days: i64,
}

impl Default for BlockingPairing {
    fn default() -> Self {
        Self { date_window_days: 3 }
    }
}

impl BlockingPairing {
    pub fn new(date_window_days: i64) -> Self {
        Self {
            date_window_days: date_window_days.max(0),
        }
    }
}

impl PairingStrategy for BlockingPairing {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn pair(&self, rewards: &[Transaction], pos: &[Transaction]) -> PairingOutcome {
        let pos_keys: Vec<String> = pos.iter().map(|t| blocking_key(&t.customer_name)).collect();
        let mut pos_used = vec![false; pos.len()];
        let mut outcome = PairingOutcome::default();

        for reward in rewards {
            let key = blocking_key(&reward.customer_name);
            let mut best: Option<(usize, i64, f64)> = None;

            for (pi, candidate) in pos.iter().enumerate() {
                if pos_used[pi] || key.is_empty() || pos_keys[pi] != key {
                    continue;
                }
                let Some(date_off) = day_offset(reward, candidate) else {
                    continue;
                };
                if date_off > self.date_window_days {
                    continue;
                }
                let delta = (reward.amount - candidate.amount).abs();

                let better = match best {
                    None => true,
                    Some((_, best_off, best_delta)) => {
                        date_off.cmp(&best_off).then(delta.total_cmp(&best_delta))
                            == Ordering::Less
                    }
                };
                if better {
                    best = Some((pi, date_off, delta));
                }
            }

            match best {
                Some((pi, _, _)) => {
                    pos_used[pi] = true;
                    outcome.pairs.push(TransactionPair {
                        pair_index: outcome.pairs.len(),
                        reward_transaction: reward.clone(),
                        pos_transaction: pos[pi].clone(),
                    });
                }
                None => outcome.unpaired_rewards.push(reward.clone()),
            }
        }

        outcome.unused_pos = pos_used.iter().filter(|used| !**used).count();
        outcome
    }
}

/// Lowercased alphanumeric tokens, sorted, so "Doe, John" and "john doe" collide.
pub fn blocking_key(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn day_offset(a: &Transaction, b: &Transaction) -> Option<i64> {
    let (a, b) = (a.date?, b.date?);
    Some((a.date_naive() - b.date_naive()).num_days().abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceSystem;
    use chrono::{TimeZone, Utc};

    fn txn(id: &str, name: &str, amount: f64, day: u32, source: SourceSystem) -> Transaction {
        Transaction {
            id: id.to_string(),
            customer_name: name.to_string(),
            amount,
            date: Some(Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap()),
            service: "Botox".to_string(),
            source_system: source,
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
    fn test_blocking_key_normalizes_order_and_punctuation() {
        assert_eq!(blocking_key("Doe, John"), "doe john");
        assert_eq!(blocking_key("  JOHN   doe "), "doe john");
        assert_eq!(blocking_key("--"), "");
    }

    #[test]
    fn test_positional_zips_by_index() {
        let rewards = vec![
            txn("a0", "A A", 1.0, 1, SourceSystem::Alle),
            txn("a1", "B B", 2.0, 2, SourceSystem::Alle),
            txn("a2", "C C", 3.0, 3, SourceSystem::Alle),
        ];
        let pos = vec![
            txn("p0", "X X", 1.0, 1, SourceSystem::Pos),
            txn("p1", "Y Y", 2.0, 2, SourceSystem::Pos),
        ];
        let outcome = PositionalPairing.pair(&rewards, &pos);
        assert_eq!(outcome.pairs.len(), 2);
        assert_eq!(outcome.pairs[1].reward_transaction.id, "a1");
        assert_eq!(outcome.pairs[1].pos_transaction.id, "p1");
        assert_eq!(outcome.unpaired_rewards.len(), 1);
        assert_eq!(outcome.unused_pos, 0);
    }

    #[test]
    fn test_blocking_prefers_closest_date_then_amount() {
        let rewards = vec![txn("a0", "John Doe", 100.0, 10, SourceSystem::Alle)];
        let pos = vec![
            txn("p_far", "Doe John", 100.0, 12, SourceSystem::Pos),
            txn("p_near_off", "john doe", 80.0, 10, SourceSystem::Pos),
            txn("p_near", "JOHN DOE", 99.0, 10, SourceSystem::Pos),
            txn("p_other", "Jane Doe", 100.0, 10, SourceSystem::Pos),
        ];
        let outcome = BlockingPairing::default().pair(&rewards, &pos);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].pos_transaction.id, "p_near");
        assert_eq!(outcome.unused_pos, 3);
    }

    #[test]
    fn test_blocking_uses_each_pos_row_once_and_respects_window() {
        let rewards = vec![
            txn("a0", "John Doe", 100.0, 10, SourceSystem::Alle),
            txn("a1", "John Doe", 100.0, 10, SourceSystem::Aspire),
            txn("a2", "Mary Major", 50.0, 1, SourceSystem::Aspire),
        ];
        let pos = vec![
            txn("p0", "John Doe", 100.0, 11, SourceSystem::Pos),
            txn("p1", "Mary Major", 50.0, 20, SourceSystem::Pos),
        ];
        let outcome = BlockingPairing::new(3).pair(&rewards, &pos);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].pair_index, 0);
        let unpaired: Vec<&str> = outcome.unpaired_rewards.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(unpaired, vec!["a1", "a2"]);
    }
}
