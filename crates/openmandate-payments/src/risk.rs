//! Risk scoring
//!
//! A score in [0, 1] computed purely from the payment amount and the
//! session's audit history - no hidden randomness, so tests are
//! deterministic.

use openmandate_store::AuditRecord;
use openmandate_types::Amount;

/// Risk scorer collaborator
pub trait RiskScorer: Send + Sync {
    /// Score a prospective payment given the session's transition history
    fn score(&self, amount: Amount, history: &[AuditRecord]) -> f64;
}

/// Weighted combination of amount magnitude and prior rejections
///
/// The amount contributes its fraction of a reference cap; each rejected
/// record in the session history adds a fixed penalty. Weights sum to 1, so
/// the result stays in [0, 1].
pub struct WeightedRiskScorer {
    /// Amount at which the amount component saturates
    pub reference_cap: Amount,
    /// Weight of the amount component
    pub amount_weight: f64,
    /// Weight of the rejection component
    pub rejection_weight: f64,
    /// Rejections at which the rejection component saturates
    pub rejection_cap: u32,
}

impl Default for WeightedRiskScorer {
    fn default() -> Self {
        Self {
            reference_cap: Amount::from_cents(500_000),
            amount_weight: 0.6,
            rejection_weight: 0.4,
            rejection_cap: 4,
        }
    }
}

impl RiskScorer for WeightedRiskScorer {
    fn score(&self, amount: Amount, history: &[AuditRecord]) -> f64 {
        let amount_part = amount.ratio_of(self.reference_cap);
        let rejections = history
            .iter()
            .filter(|record| !record.outcome.is_accepted())
            .count() as f64;
        let rejection_part = (rejections / self.rejection_cap.max(1) as f64).clamp(0.0, 1.0);
        (self.amount_weight * amount_part + self.rejection_weight * rejection_part).clamp(0.0, 1.0)
    }
}
