//! Domain types for the commission engine.
//!
//! All monetary amounts and percentage rates are `rust_decimal::Decimal`.
//! Statuses round-trip through their `as_str`/`parse` pairs so storage
//! backends can persist them as plain text.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the referral tree, with its running earnings ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affiliate {
    pub id: Uuid,
    /// Human-shareable code, unique across the program.
    pub referral_code: String,
    /// The referring affiliate. `None` for roots of the forest.
    pub parent_id: Option<Uuid>,
    /// All-time credited earnings. Never decreases once credited.
    pub total_earnings: Decimal,
    /// Released, withdrawable balance.
    pub available_balance: Decimal,
    /// Distributed but not yet released.
    pub pending_balance: Decimal,
    /// Denormalized counter, recomputed by `ReferralGraph::refresh_counters`.
    pub direct_referrals: u32,
    /// Denormalized counter over the whole downline, may lag.
    pub total_downline: u32,
    /// Gates whether new sales may be attributed to this affiliate.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Affiliate {
    /// A fresh affiliate with a zeroed ledger.
    pub fn new(referral_code: String, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            referral_code,
            parent_id,
            total_earnings: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            direct_referrals: 0,
            total_downline: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time view of an affiliate's balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_earnings: Decimal,
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
}

/// How a sale was paid. Validated at the boundary, one variant per method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer { bank_name: String, account_last4: String },
    Card { brand: String, last4: String },
    Other { label: String },
}

/// Verification state of a recorded sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "VERIFIED" => Some(Self::Verified),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Admin decision on a pending sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Rejected,
}

impl From<VerificationOutcome> for VerificationStatus {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Verified => Self::Verified,
            VerificationOutcome::Rejected => Self::Rejected,
        }
    }
}

/// One row per external sale reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateSale {
    pub id: Uuid,
    /// Globally unique external identifier. Enforced by the store.
    pub sale_reference: String,
    /// The directly-attributed seller.
    pub affiliate_id: Uuid,
    pub sale_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub verification_status: VerificationStatus,
    /// True only after the release step completes.
    pub commissions_paid: bool,
    pub created_at: DateTime<Utc>,
}

impl AffiliateSale {
    pub fn new(
        sale_reference: String,
        affiliate_id: Uuid,
        sale_amount: Decimal,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sale_reference,
            affiliate_id,
            sale_amount,
            payment_method,
            verification_status: VerificationStatus::Pending,
            commissions_paid: false,
            created_at: Utc::now(),
        }
    }
}

/// One row of the ordered rate schedule. Level 0 is the direct seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRateSetting {
    pub id: Uuid,
    pub level: u32,
    /// Percentage of the sale amount allocated to this level.
    pub rate: Decimal,
    /// Shared ceiling on the summed rate. Read from the level-0 row.
    pub max_total_rate: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CommissionRateSetting {
    pub fn new(level: u32, rate: Decimal, max_total_rate: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            rate,
            max_total_rate,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Settlement state of a commission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionStatus {
    Pending,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PAID" => Some(Self::Paid),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One row per (sale, level) produced by a single distribution run.
///
/// At most one non-cancelled batch may ever exist per sale; the stores
/// back this with a partial unique index on `(sale_id, level)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: Uuid,
    pub sale_id: Uuid,
    pub affiliate_id: Uuid,
    pub level: u32,
    /// Rate applied at distribution time, snapshotted for auditability.
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::Verified,
            VerificationStatus::Rejected,
        ] {
            assert_eq!(VerificationStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            CommissionStatus::Pending,
            CommissionStatus::Paid,
            CommissionStatus::Cancelled,
        ] {
            assert_eq!(CommissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VerificationStatus::parse("bogus"), None);
    }

    #[test]
    fn payment_method_is_tagged() {
        let method = PaymentMethod::Card {
            brand: "visa".into(),
            last4: "4242".into(),
        };
        let json = serde_json::to_string(&method).unwrap();
        assert!(json.contains(r#""method":"card""#));
        let back: PaymentMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, method);
    }
}
