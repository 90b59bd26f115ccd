//! In-memory store for tests and database-free embedding.
//!
//! A single `RwLock` write guard spans every mutating operation, which
//! gives the same atomicity the SQL backends get from transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::distributor::CommissionAllocation;
use crate::interfaces::store::{CommissionStore, Result, StorageError};
use crate::types::{
    Affiliate, AffiliateSale, CommissionRateSetting, CommissionRecord, CommissionStatus,
    LedgerSnapshot, VerificationStatus,
};

#[derive(Default)]
struct Inner {
    affiliates: HashMap<Uuid, Affiliate>,
    codes: HashMap<String, Uuid>,
    sales: HashMap<Uuid, AffiliateSale>,
    sale_refs: HashMap<String, Uuid>,
    schedule: Vec<CommissionRateSetting>,
    commissions: Vec<CommissionRecord>,
}

impl Inner {
    fn batch_for_sale(&self, sale_id: Uuid) -> Vec<&CommissionRecord> {
        self.commissions
            .iter()
            .filter(|c| c.sale_id == sale_id)
            .collect()
    }

    fn affiliate_mut(&mut self, id: Uuid) -> Result<&mut Affiliate> {
        self.affiliates.get_mut(&id).ok_or(StorageError::RowMissing {
            entity: "affiliate",
            id,
        })
    }
}

/// Mock-style store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommissionStore for MemoryStore {
    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.codes.contains_key(&affiliate.referral_code) {
            return Err(StorageError::DuplicateCode(affiliate.referral_code.clone()));
        }
        inner
            .codes
            .insert(affiliate.referral_code.clone(), affiliate.id);
        inner.affiliates.insert(affiliate.id, affiliate.clone());
        Ok(())
    }

    async fn affiliate(&self, id: Uuid) -> Result<Option<Affiliate>> {
        Ok(self.inner.read().await.affiliates.get(&id).cloned())
    }

    async fn affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>> {
        let inner = self.inner.read().await;
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.affiliates.get(id))
            .cloned())
    }

    async fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .affiliates
            .values()
            .filter(|a| a.parent_id == Some(id))
            .map(|a| a.id)
            .collect())
    }

    async fn set_affiliate_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.affiliate_mut(id)?.is_active = active;
        Ok(())
    }

    async fn update_counters(&self, id: Uuid, direct: u32, downline: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        let affiliate = inner.affiliate_mut(id)?;
        affiliate.direct_referrals = direct;
        affiliate.total_downline = downline;
        Ok(())
    }

    async fn ledger(&self, id: Uuid) -> Result<Option<LedgerSnapshot>> {
        Ok(self.inner.read().await.affiliates.get(&id).map(|a| {
            LedgerSnapshot {
                total_earnings: a.total_earnings,
                available_balance: a.available_balance,
                pending_balance: a.pending_balance,
            }
        }))
    }

    async fn active_schedule(&self) -> Result<Vec<CommissionRateSetting>> {
        let mut rows: Vec<_> = self
            .inner
            .read()
            .await
            .schedule
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.level);
        Ok(rows)
    }

    async fn replace_schedule(&self, rows: &[CommissionRateSetting]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for row in inner.schedule.iter_mut() {
            row.is_active = false;
        }
        inner.schedule.extend(rows.iter().cloned());
        Ok(())
    }

    async fn insert_sale(&self, sale: &AffiliateSale) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sale_refs.contains_key(&sale.sale_reference) {
            return Err(StorageError::DuplicateReference(sale.sale_reference.clone()));
        }
        inner.sale_refs.insert(sale.sale_reference.clone(), sale.id);
        inner.sales.insert(sale.id, sale.clone());
        Ok(())
    }

    async fn sale(&self, id: Uuid) -> Result<Option<AffiliateSale>> {
        Ok(self.inner.read().await.sales.get(&id).cloned())
    }

    async fn sale_by_reference(&self, reference: &str) -> Result<Option<AffiliateSale>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sale_refs
            .get(reference)
            .and_then(|id| inner.sales.get(id))
            .cloned())
    }

    async fn set_verification(&self, id: Uuid, status: VerificationStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let sale = inner.sales.get_mut(&id).ok_or(StorageError::RowMissing {
            entity: "sale",
            id,
        })?;
        if sale.verification_status != VerificationStatus::Pending {
            return Err(StorageError::VerificationSettled { sale_id: id });
        }
        sale.verification_status = status;
        Ok(())
    }

    async fn commissions_for_sale(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .batch_for_sale(sale_id)
            .into_iter()
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.level);
        Ok(rows)
    }

    async fn insert_commission_batch(
        &self,
        sale_id: Uuid,
        allocations: &[CommissionAllocation],
    ) -> Result<Vec<CommissionRecord>> {
        let mut inner = self.inner.write().await;

        if inner
            .batch_for_sale(sale_id)
            .iter()
            .any(|c| c.status != CommissionStatus::Cancelled)
        {
            return Err(StorageError::BatchExists { sale_id });
        }

        // Validate every affiliate before mutating anything, so a failure
        // leaves the ledger untouched.
        for allocation in allocations {
            if !inner.affiliates.contains_key(&allocation.affiliate_id) {
                return Err(StorageError::RowMissing {
                    entity: "affiliate",
                    id: allocation.affiliate_id,
                });
            }
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            let affiliate = inner.affiliate_mut(allocation.affiliate_id)?;
            affiliate.pending_balance += allocation.amount;

            records.push(CommissionRecord {
                id: Uuid::new_v4(),
                sale_id,
                affiliate_id: allocation.affiliate_id,
                level: allocation.level,
                commission_rate: allocation.rate,
                commission_amount: allocation.amount,
                status: CommissionStatus::Pending,
                created_at: now,
            });
        }
        inner.commissions.extend(records.iter().cloned());

        Ok(records)
    }

    async fn release_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let mut inner = self.inner.write().await;

        let batch = inner.batch_for_sale(sale_id);
        if batch.iter().any(|c| c.status == CommissionStatus::Paid) {
            return Err(StorageError::BatchAlreadyPaid { sale_id });
        }
        let pending: Vec<CommissionRecord> = batch
            .into_iter()
            .filter(|c| c.status == CommissionStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Err(StorageError::BatchMissing { sale_id });
        }

        // Validate before mutating so a failure leaves the ledger intact.
        for record in &pending {
            let affiliate = inner.affiliate_mut(record.affiliate_id)?;
            if affiliate.pending_balance < record.commission_amount {
                return Err(StorageError::LedgerUnderflow {
                    affiliate_id: record.affiliate_id,
                });
            }
        }
        for record in &pending {
            let affiliate = inner.affiliate_mut(record.affiliate_id)?;
            affiliate.pending_balance -= record.commission_amount;
            affiliate.available_balance += record.commission_amount;
            affiliate.total_earnings += record.commission_amount;
        }

        let mut released = Vec::with_capacity(pending.len());
        for record in inner.commissions.iter_mut() {
            if record.sale_id == sale_id && record.status == CommissionStatus::Pending {
                record.status = CommissionStatus::Paid;
                released.push(record.clone());
            }
        }

        if let Some(sale) = inner.sales.get_mut(&sale_id) {
            sale.commissions_paid = true;
        }

        released.sort_by_key(|c| c.level);
        Ok(released)
    }

    async fn cancel_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let mut inner = self.inner.write().await;

        let batch = inner.batch_for_sale(sale_id);
        if batch.iter().any(|c| c.status == CommissionStatus::Paid) {
            return Err(StorageError::BatchAlreadyPaid { sale_id });
        }
        let pending: Vec<CommissionRecord> = batch
            .into_iter()
            .filter(|c| c.status == CommissionStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Err(StorageError::BatchMissing { sale_id });
        }

        for record in &pending {
            let affiliate = inner.affiliate_mut(record.affiliate_id)?;
            if affiliate.pending_balance < record.commission_amount {
                return Err(StorageError::LedgerUnderflow {
                    affiliate_id: record.affiliate_id,
                });
            }
        }
        for record in &pending {
            let affiliate = inner.affiliate_mut(record.affiliate_id)?;
            affiliate.pending_balance -= record.commission_amount;
        }

        let mut cancelled = Vec::with_capacity(pending.len());
        for record in inner.commissions.iter_mut() {
            if record.sale_id == sale_id && record.status == CommissionStatus::Pending {
                record.status = CommissionStatus::Cancelled;
                cancelled.push(record.clone());
            }
        }

        cancelled.sort_by_key(|c| c.level);
        Ok(cancelled)
    }
}
