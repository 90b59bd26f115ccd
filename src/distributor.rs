//! Commission distribution planning.
//!
//! `plan_distribution` is the core business algorithm: it turns a sale
//! amount, the active rate schedule, and a referral hierarchy into a
//! capped, level-weighted set of allocations. It is pure so that the
//! preview path and the real distribution path share it byte-for-byte.

use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::graph::ReferralGraph;
use crate::interfaces::CommissionStore;

/// One level's share of a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionAllocation {
    pub affiliate_id: Uuid,
    /// 0 = direct seller, 1 = first upline, ...
    pub level: u32,
    /// Percentage actually allocated; less than the scheduled rate when
    /// the level was truncated by the cap.
    pub rate: Decimal,
    pub amount: Decimal,
    /// True when this level received only the remaining headroom.
    pub capped: bool,
}

/// Full output of one distribution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub allocations: Vec<CommissionAllocation>,
    pub total_rate: Decimal,
    pub total_amount: Decimal,
}

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn commission_amount(sale_amount: Decimal, rate: Decimal) -> Decimal {
    (sale_amount * rate / HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Walk the hierarchy paired with the schedule, allocating rates until the
/// shared cap is exhausted.
///
/// The schedule must be non-empty and ordered by level ascending; the cap
/// is the level-0 row's `max_total_rate`. The hierarchy starts with the
/// direct seller. Levels past the end of the hierarchy are skipped, their
/// rate is not redistributed. Once a level is truncated by the cap, no
/// deeper level receives anything: level 0 has strict priority.
pub fn plan_distribution(
    schedule: &[crate::types::CommissionRateSetting],
    hierarchy: &[Uuid],
    sale_amount: Decimal,
) -> DistributionPlan {
    let max_total_rate = schedule.first().map(|s| s.max_total_rate).unwrap_or_default();

    let mut allocations = Vec::new();
    let mut total_rate = Decimal::ZERO;
    let mut total_amount = Decimal::ZERO;

    for (level, (affiliate_id, setting)) in hierarchy.iter().zip(schedule.iter()).enumerate() {
        let headroom = max_total_rate - total_rate;
        if headroom <= Decimal::ZERO {
            break;
        }

        let capped = setting.rate > headroom;
        let rate = if capped { headroom } else { setting.rate };
        if rate <= Decimal::ZERO {
            break;
        }

        let amount = commission_amount(sale_amount, rate);
        debug!(level, %rate, %amount, capped, "allocated commission level");

        allocations.push(CommissionAllocation {
            affiliate_id: *affiliate_id,
            level: level as u32,
            rate,
            amount,
            capped,
        });

        total_rate += rate;
        total_amount += amount;

        if capped {
            break;
        }
    }

    DistributionPlan {
        allocations,
        total_rate,
        total_amount,
    }
}

/// Builds distribution plans against live affiliate and schedule data.
pub struct Distributor {
    store: Arc<dyn CommissionStore>,
    graph: ReferralGraph,
}

impl Distributor {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        let graph = ReferralGraph::new(store.clone());
        Self { store, graph }
    }

    /// Plan the distribution a sale of `amount` attributed to `affiliate_id`
    /// would produce under the current schedule. Read-only.
    ///
    /// The real distribution and the preview both come through here, so
    /// their allocations are identical by construction.
    pub async fn plan_for_affiliate(
        &self,
        affiliate_id: Uuid,
        amount: Decimal,
    ) -> Result<DistributionPlan> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(amount));
        }

        self.store
            .affiliate(affiliate_id)
            .await?
            .ok_or(EngineError::AffiliateNotFound(affiliate_id))?;

        let schedule = self.store.active_schedule().await?;
        if schedule.is_empty() {
            return Err(EngineError::NoActiveSchedule);
        }

        // Direct seller first, then nearest-parent-first upline, bounded by
        // the schedule length.
        let max_upline = schedule.len().saturating_sub(1) as u32;
        let upline = self.graph.upline_chain(affiliate_id, max_upline).await?;

        let mut hierarchy = Vec::with_capacity(upline.len() + 1);
        hierarchy.push(affiliate_id);
        hierarchy.extend(upline);

        Ok(plan_distribution(&schedule, &hierarchy, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommissionRateSetting;
    use rust_decimal_macros::dec;

    fn schedule(rates: &[Decimal], cap: Decimal) -> Vec<CommissionRateSetting> {
        rates
            .iter()
            .enumerate()
            .map(|(level, rate)| CommissionRateSetting::new(level as u32, *rate, cap))
            .collect()
    }

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn seller_without_upline_gets_level_zero_only() {
        let schedule = schedule(&[dec!(10), dec!(5), dec!(2.5)], dec!(25));
        let hierarchy = ids(1);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(1000));

        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].level, 0);
        assert_eq!(plan.allocations[0].rate, dec!(10));
        assert_eq!(plan.allocations[0].amount, dec!(100.00));
        assert!(!plan.allocations[0].capped);
        assert_eq!(plan.total_rate, dec!(10));
    }

    #[test]
    fn full_depth_under_cap() {
        let schedule = schedule(&[dec!(10), dec!(5), dec!(2.5)], dec!(25));
        let hierarchy = ids(3);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(1000));

        let amounts: Vec<Decimal> = plan.allocations.iter().map(|a| a.amount).collect();
        assert_eq!(amounts, vec![dec!(100.00), dec!(50.00), dec!(25.00)]);
        assert_eq!(plan.total_rate, dec!(17.5));
        assert_eq!(plan.total_amount, dec!(175.00));
        assert!(plan.allocations.iter().all(|a| !a.capped));
    }

    #[test]
    fn cap_truncates_deepest_level_and_stops() {
        let schedule = schedule(&[dec!(20), dec!(10)], dec!(25));
        let hierarchy = ids(3);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(1000));

        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].rate, dec!(20));
        assert_eq!(plan.allocations[0].amount, dec!(200.00));
        assert!(!plan.allocations[0].capped);
        // Level 1 gets only the remaining 5% headroom.
        assert_eq!(plan.allocations[1].rate, dec!(5));
        assert_eq!(plan.allocations[1].amount, dec!(50.00));
        assert!(plan.allocations[1].capped);
        assert_eq!(plan.total_rate, dec!(25));
    }

    #[test]
    fn zero_headroom_level_gets_nothing() {
        let schedule = schedule(&[dec!(25), dec!(10)], dec!(25));
        let hierarchy = ids(2);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(400));

        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].rate, dec!(25));
        assert_eq!(plan.total_rate, dec!(25));
    }

    #[test]
    fn total_rate_never_exceeds_cap() {
        let schedule = schedule(&[dec!(15), dec!(15), dec!(15), dec!(15)], dec!(30));
        let hierarchy = ids(4);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(100));

        assert!(plan.total_rate <= dec!(30));
        assert_eq!(plan.total_rate, dec!(30));
        // Shallower levels received their full scheduled rate.
        assert!(!plan.allocations[0].capped);
        assert!(!plan.allocations[1].capped);
        assert_eq!(plan.allocations.len(), 2);
    }

    #[test]
    fn amounts_round_to_cents() {
        let schedule = schedule(&[dec!(3.33)], dec!(10));
        let hierarchy = ids(1);

        let plan = plan_distribution(&schedule, &hierarchy, dec!(9.99));

        // 9.99 * 3.33% = 0.332667 -> 0.33
        assert_eq!(plan.allocations[0].amount, dec!(0.33));
    }
}
