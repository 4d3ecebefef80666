// 🔍 Suspected duplicate payments - review report
// Two strategies: Exact Match, Near Match
//
// Import already refuses rows whose dedup hash exists. This engine looks for
// the duplicates a hash cannot see: the same rent keyed twice by two agents,
// or entered once by hand and once through a spreadsheet.

use crate::error::Result;
use crate::models::payment::query_payments;
use crate::models::{Payment, PaymentFilter, PaymentSort, PaymentStatus};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Exact match: same contract, same day, same amount
    ExactMatch,

    /// Near match: same tenant, ±1 day, same amount
    NearMatch,
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub first_payment_id: i64,
    pub second_payment_id: i64,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    pub strategy: MatchStrategy,

    /// Human-readable reason
    pub reason: String,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    /// Confidence reported for exact matches (default: 0.95)
    pub exact_match_confidence: f64,

    /// Floor confidence for near matches (default: 0.70)
    pub near_match_threshold: f64,

    /// Date tolerance for near matches in days (default: 1)
    pub date_tolerance_days: i64,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            exact_match_confidence: 0.95,
            near_match_threshold: 0.70,
            date_tolerance_days: 1,
        }
    }

    /// Find suspected duplicates. Failed payments are ignored.
    ///
    /// Payments are compared pairwise inside a sliding date window, so the
    /// input order does not matter.
    pub fn find_duplicates(&self, payments: &[Payment]) -> Vec<DuplicateMatch> {
        let mut candidates: Vec<&Payment> = payments
            .iter()
            .filter(|p| p.status != PaymentStatus::Failed)
            .collect();
        candidates.sort_by_key(|p| (p.paid_at, p.id));

        let mut matches = Vec::new();
        for (i, p1) in candidates.iter().enumerate() {
            for p2 in &candidates[i + 1..] {
                if (p2.paid_at - p1.paid_at).num_days() > self.date_tolerance_days {
                    break;
                }

                if let Some(m) = self.check_exact_match(p1, p2) {
                    matches.push(m);
                    continue;
                }

                if let Some(m) = self.check_near_match(p1, p2) {
                    matches.push(m);
                }
            }
        }

        matches
    }

    /// Strategy 1: same contract, same day, same amount → 95% confidence
    fn check_exact_match(&self, p1: &Payment, p2: &Payment) -> Option<DuplicateMatch> {
        if p1.contract_id.is_none() || p1.contract_id != p2.contract_id {
            return None;
        }
        if p1.paid_at != p2.paid_at || p1.amount != p2.amount {
            return None;
        }

        Some(DuplicateMatch {
            first_payment_id: p1.id,
            second_payment_id: p2.id,
            confidence: self.exact_match_confidence,
            strategy: MatchStrategy::ExactMatch,
            reason: format!(
                "Exact match: contract {} | {} | {} GNF",
                p1.contract_id.unwrap_or_default(),
                p1.paid_at,
                p1.amount
            ),
        })
    }

    /// Strategy 2: same tenant, dates within tolerance, same amount
    fn check_near_match(&self, p1: &Payment, p2: &Payment) -> Option<DuplicateMatch> {
        if p1.tenant_id.is_none() || p1.tenant_id != p2.tenant_id {
            return None;
        }
        if p1.amount != p2.amount {
            return None;
        }

        let date_diff = (p2.paid_at - p1.paid_at).num_days().abs();
        if date_diff > self.date_tolerance_days {
            return None;
        }

        // Closer dates and an identical mode raise confidence
        let date_score = 1.0 - (date_diff as f64 / (self.date_tolerance_days as f64 + 1.0));
        let mode_score = if p1.mode == p2.mode { 1.0 } else { 0.6 };
        let confidence = (date_score * 0.5 + mode_score * 0.4)
            .max(self.near_match_threshold)
            .min(self.exact_match_confidence - 0.05);

        Some(DuplicateMatch {
            first_payment_id: p1.id,
            second_payment_id: p2.id,
            confidence,
            strategy: MatchStrategy::NearMatch,
            reason: format!(
                "Near match: tenant {} | {} ≈ {} | {} GNF | {} / {}",
                p1.tenant_id.unwrap_or_default(),
                p1.paid_at,
                p2.paid_at,
                p1.amount,
                p1.mode,
                p2.mode
            ),
        })
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the engine over an agency's payments in `[from, to]`
pub fn review_duplicates(
    conn: &Connection,
    agency_id: i64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<DuplicateMatch>> {
    let payments = query_payments(
        conn,
        agency_id,
        &PaymentFilter {
            from,
            to,
            sort: PaymentSort::PaidAtAsc,
            ..Default::default()
        },
    )?;

    let mut matches = DeduplicationEngine::new().find_duplicates(&payments);
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(matches)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMode;

    fn payment(
        id: i64,
        contract: i64,
        tenant: i64,
        date: &str,
        amount: i64,
        mode: PaymentMode,
    ) -> Payment {
        Payment {
            id,
            agency_id: 1,
            contract_id: Some(contract),
            tenant_id: Some(tenant),
            owner_id: None,
            property_id: None,
            amount,
            currency: "GNF".into(),
            mode,
            status: PaymentStatus::Confirmed,
            paid_at: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            due_date: None,
            reference: None,
            external_ref: None,
            allocation: None,
            channel: None,
            comment: None,
            commission_amount: 0,
            owner_net: amount,
            raw_hash: id.to_string(),
            idempotency_key: None,
            source_file: None,
            import_run_id: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_exact_match() {
        let engine = DeduplicationEngine::new();
        let payments = vec![
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
            payment(2, 10, 5, "2024-03-05", 800_000, PaymentMode::OrangeMoney),
        ];

        let matches = engine.find_duplicates(&payments);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::ExactMatch);
        assert!(matches[0].confidence >= 0.95);
    }

    #[test]
    fn test_near_match_one_day_apart() {
        let engine = DeduplicationEngine::new();
        let payments = vec![
            payment(2, 11, 5, "2024-03-06", 800_000, PaymentMode::Cash),
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
        ];

        let matches = engine.find_duplicates(&payments);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::NearMatch);
        assert_eq!(matches[0].first_payment_id, 1);
        assert!(matches[0].confidence >= 0.70);
        assert!(matches[0].confidence < 0.95);
    }

    #[test]
    fn test_failed_payments_ignored() {
        let engine = DeduplicationEngine::new();
        let mut failed = payment(2, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash);
        failed.status = PaymentStatus::Failed;
        let payments = vec![
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
            failed,
        ];

        assert!(engine.find_duplicates(&payments).is_empty());
    }

    #[test]
    fn test_no_match_different_amounts() {
        let engine = DeduplicationEngine::new();
        let payments = vec![
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
            payment(2, 10, 5, "2024-03-05", 750_000, PaymentMode::Cash),
        ];
        assert!(engine.find_duplicates(&payments).is_empty());
    }

    #[test]
    fn test_no_match_two_days_apart() {
        let engine = DeduplicationEngine::new();
        let payments = vec![
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
            payment(2, 10, 5, "2024-03-07", 800_000, PaymentMode::Cash),
        ];
        assert!(engine.find_duplicates(&payments).is_empty());
    }

    #[test]
    fn test_no_match_different_tenants() {
        let engine = DeduplicationEngine::new();
        let payments = vec![
            payment(1, 10, 5, "2024-03-05", 800_000, PaymentMode::Cash),
            payment(2, 12, 6, "2024-03-05", 800_000, PaymentMode::Cash),
        ];
        assert!(engine.find_duplicates(&payments).is_empty());
    }
}
