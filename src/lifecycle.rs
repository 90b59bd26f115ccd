//! Sale lifecycle coordination.
//!
//! `CommissionEngine` owns the sale state machine
//! (`PENDING → VERIFIED/REJECTED`, distribute, release/cancel) and the
//! duplicate-prevention protocol around distribution. Every mutating
//! operation either completes atomically or returns an error with no
//! state change.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::codes;
use crate::config::ReferralConfig;
use crate::distributor::{DistributionPlan, Distributor};
use crate::error::{EngineError, Result};
use crate::graph::{DownlineStats, ReferralGraph};
use crate::interfaces::CommissionStore;
use crate::types::{
    Affiliate, AffiliateSale, CommissionRateSetting, CommissionRecord, CommissionStatus,
    LedgerSnapshot, PaymentMethod, VerificationOutcome, VerificationStatus,
};

/// The commission engine: referral enrollment, sale lifecycle, commission
/// distribution, and the earnings ledger, over a pluggable store.
pub struct CommissionEngine {
    store: Arc<dyn CommissionStore>,
    distributor: Distributor,
    graph: ReferralGraph,
    referral: ReferralConfig,
}

impl CommissionEngine {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self::with_config(store, ReferralConfig::default())
    }

    pub fn with_config(store: Arc<dyn CommissionStore>, referral: ReferralConfig) -> Self {
        let distributor = Distributor::new(store.clone());
        let graph = ReferralGraph::new(store.clone());
        Self {
            store,
            distributor,
            graph,
            referral,
        }
    }

    // --- enrollment ---

    /// Enroll a new affiliate, optionally under the affiliate holding
    /// `parent_code`. Generates a collision-checked referral code.
    pub async fn enroll_affiliate(&self, parent_code: Option<&str>) -> Result<Affiliate> {
        let parent_id = match parent_code {
            Some(code) => {
                let parent = self
                    .store
                    .affiliate_by_code(code)
                    .await?
                    .ok_or_else(|| EngineError::UnknownReferralCode(code.to_string()))?;
                Some(parent.id)
            }
            None => None,
        };

        let code = codes::unique_referral_code(
            self.store.as_ref(),
            self.referral.code_length,
            self.referral.code_retries,
        )
        .await?;

        let affiliate = Affiliate::new(code, parent_id);
        self.store.insert_affiliate(&affiliate).await?;

        if let Some(parent_id) = parent_id {
            self.graph
                .refresh_counters(parent_id, self.referral.downline_depth)
                .await?;
        }

        info!(affiliate_id = %affiliate.id, parent = ?parent_id, "affiliate enrolled");
        Ok(affiliate)
    }

    pub async fn affiliate(&self, id: Uuid) -> Result<Affiliate> {
        self.store
            .affiliate(id)
            .await?
            .ok_or(EngineError::AffiliateNotFound(id))
    }

    /// Soft-deactivate (or reactivate) an affiliate. Deactivation only
    /// gates new sale attribution; existing commissions are untouched.
    pub async fn set_affiliate_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.store.set_affiliate_active(id, active).await?;
        info!(affiliate_id = %id, active, "affiliate activation changed");
        Ok(())
    }

    /// Recompute and persist the denormalized downline counters.
    pub async fn downline_stats(&self, id: Uuid) -> Result<DownlineStats> {
        self.affiliate(id).await?;
        self.graph
            .refresh_counters(id, self.referral.downline_depth)
            .await
    }

    // --- rate schedule administration ---

    /// Replace the active rate schedule. `rates[level]` is the percentage
    /// for that level; `max_total_rate` is the shared ceiling.
    pub async fn replace_schedule(
        &self,
        rates: &[Decimal],
        max_total_rate: Decimal,
    ) -> Result<Vec<CommissionRateSetting>> {
        if rates.is_empty() {
            return Err(EngineError::InvalidSchedule("no levels given".into()));
        }
        if rates.iter().any(|r| *r <= Decimal::ZERO) {
            return Err(EngineError::InvalidSchedule(
                "every level rate must be positive".into(),
            ));
        }
        if max_total_rate <= Decimal::ZERO {
            return Err(EngineError::InvalidSchedule(
                "max total rate must be positive".into(),
            ));
        }
        if max_total_rate < rates[0] {
            return Err(EngineError::InvalidSchedule(
                "max total rate must cover the level 0 rate".into(),
            ));
        }

        let rows: Vec<CommissionRateSetting> = rates
            .iter()
            .enumerate()
            .map(|(level, rate)| CommissionRateSetting::new(level as u32, *rate, max_total_rate))
            .collect();

        self.store.replace_schedule(&rows).await?;
        info!(levels = rows.len(), %max_total_rate, "rate schedule replaced");
        Ok(rows)
    }

    // --- sale lifecycle ---

    /// Record a sale attributed to an affiliate.
    ///
    /// Validation happens before any persistence; the store's unique
    /// constraint on the reference is the authoritative duplicate check.
    pub async fn record_sale(
        &self,
        affiliate_id: Uuid,
        sale_reference: &str,
        amount: Decimal,
        payment_method: PaymentMethod,
    ) -> Result<AffiliateSale> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(amount));
        }
        if sale_reference.trim().is_empty() {
            return Err(EngineError::EmptyReference);
        }

        let affiliate = self.affiliate(affiliate_id).await?;
        if !affiliate.is_active {
            return Err(EngineError::InactiveAffiliate(affiliate_id));
        }

        // Fast-fail on a known reference; the insert below re-checks via
        // the unique constraint.
        if self.store.sale_by_reference(sale_reference).await?.is_some() {
            return Err(EngineError::DuplicateReference(sale_reference.to_string()));
        }

        let sale = AffiliateSale::new(
            sale_reference.to_string(),
            affiliate_id,
            amount,
            payment_method,
        );
        self.store.insert_sale(&sale).await?;

        info!(sale_id = %sale.id, reference = %sale.sale_reference, %amount, "sale recorded");
        Ok(sale)
    }

    pub async fn sale(&self, id: Uuid) -> Result<AffiliateSale> {
        self.store
            .sale(id)
            .await?
            .ok_or(EngineError::SaleNotFound(id))
    }

    pub async fn sale_by_reference(&self, reference: &str) -> Result<Option<AffiliateSale>> {
        Ok(self.store.sale_by_reference(reference).await?)
    }

    /// Decide a pending sale. Each sale is decided exactly once.
    pub async fn verify_sale(
        &self,
        sale_id: Uuid,
        outcome: VerificationOutcome,
    ) -> Result<AffiliateSale> {
        self.sale(sale_id).await?;
        self.store.set_verification(sale_id, outcome.into()).await?;

        let sale = self.sale(sale_id).await?;
        info!(sale_id = %sale_id, outcome = sale.verification_status.as_str(), "sale verified");
        Ok(sale)
    }

    /// Distribute commissions for a verified sale up its referral chain.
    ///
    /// Duplicate prevention is layered: an optimistic pre-check here, a
    /// mandatory re-check inside the store transaction, and the partial
    /// unique index underneath. At most one non-cancelled batch can ever
    /// exist for a sale.
    pub async fn distribute(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let sale = self.sale(sale_id).await?;

        if sale.verification_status != VerificationStatus::Verified {
            return Err(EngineError::NotVerified(sale_id));
        }
        if sale.commissions_paid {
            return Err(EngineError::AlreadyReleased(sale_id));
        }

        let existing = self.store.commissions_for_sale(sale_id).await?;
        if existing
            .iter()
            .any(|c| c.status != CommissionStatus::Cancelled)
        {
            warn!(sale_id = %sale_id, "distribute refused: batch already exists");
            return Err(EngineError::AlreadyDistributed(sale_id));
        }

        let plan = self
            .distributor
            .plan_for_affiliate(sale.affiliate_id, sale.sale_amount)
            .await?;

        let records = self
            .store
            .insert_commission_batch(sale_id, &plan.allocations)
            .await?;

        info!(
            sale_id = %sale_id,
            levels = records.len(),
            total_amount = %plan.total_amount,
            total_rate = %plan.total_rate,
            "commissions distributed"
        );
        Ok(records)
    }

    /// Release the pending batch for a sale: commissions become `Paid`
    /// and balances move from pending to available/total. Once per sale.
    pub async fn release(&self, sale_id: Uuid) -> Result<()> {
        let sale = self.sale(sale_id).await?;

        if sale.verification_status != VerificationStatus::Verified {
            return Err(EngineError::NotVerified(sale_id));
        }
        if sale.commissions_paid {
            return Err(EngineError::AlreadyReleased(sale_id));
        }

        let released = self.store.release_batch(sale_id).await?;

        info!(sale_id = %sale_id, levels = released.len(), "commissions released");
        Ok(())
    }

    /// Cancel the pending batch for a sale, reversing the pending
    /// balances. Paid commissions are never reversed by this path.
    pub async fn cancel(&self, sale_id: Uuid) -> Result<()> {
        let sale = self.sale(sale_id).await?;

        if sale.commissions_paid {
            return Err(EngineError::AlreadyReleased(sale_id));
        }

        let cancelled = self.store.cancel_batch(sale_id).await?;

        info!(sale_id = %sale_id, levels = cancelled.len(), "commissions cancelled");
        Ok(())
    }

    /// Release each sale independently; one failure does not abort or
    /// roll back the others.
    pub async fn bulk_release(&self, sale_ids: &[Uuid]) -> Vec<(Uuid, Result<()>)> {
        let mut results = Vec::with_capacity(sale_ids.len());
        for &sale_id in sale_ids {
            let result = self.release(sale_id).await;
            if let Err(e) = &result {
                warn!(sale_id = %sale_id, error = %e, "bulk release item failed");
            }
            results.push((sale_id, result));
        }
        results
    }

    // --- read side ---

    /// Preview the allocation a sale of `amount` would produce for this
    /// affiliate under the current schedule. Pure read; shares the
    /// planning code with `distribute`, so the output is identical.
    pub async fn preview(&self, affiliate_id: Uuid, amount: Decimal) -> Result<DistributionPlan> {
        self.distributor.plan_for_affiliate(affiliate_id, amount).await
    }

    pub async fn ledger(&self, affiliate_id: Uuid) -> Result<LedgerSnapshot> {
        self.store
            .ledger(affiliate_id)
            .await?
            .ok_or(EngineError::AffiliateNotFound(affiliate_id))
    }

    pub async fn commissions_for_sale(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        Ok(self.store.commissions_for_sale(sale_id).await?)
    }
}
