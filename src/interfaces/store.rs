//! Persistence interface for the commission engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::distributor::CommissionAllocation;
use crate::types::{
    Affiliate, AffiliateSale, CommissionRateSetting, CommissionRecord, LedgerSnapshot,
    VerificationStatus,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Conflict variants (`DuplicateReference`, `BatchExists`, ...) are raised
/// from inside the transaction that detected them; the transaction has
/// already been rolled back by the time the error is returned.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sale reference already recorded: {0}")]
    DuplicateReference(String),

    #[error("referral code already taken: {0}")]
    DuplicateCode(String),

    #[error("non-cancelled commission batch already exists for sale {sale_id}")]
    BatchExists { sale_id: Uuid },

    #[error("no commission batch exists for sale {sale_id}")]
    BatchMissing { sale_id: Uuid },

    #[error("commission batch for sale {sale_id} is already paid")]
    BatchAlreadyPaid { sale_id: Uuid },

    #[error("verification for sale {sale_id} already settled")]
    VerificationSettled { sale_id: Uuid },

    #[error("{entity} {id} not found")]
    RowMissing { entity: &'static str, id: Uuid },

    #[error("ledger underflow for affiliate {affiliate_id}: pending would drop below zero")]
    LedgerUnderflow { affiliate_id: Uuid },

    #[error("invalid decimal in column {column}: {value}")]
    InvalidDecimal { column: &'static str, value: String },

    #[error("invalid status in column {column}: {value}")]
    InvalidStatus { column: &'static str, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid payment method payload: {0}")]
    InvalidPaymentMethod(#[from] serde_json::Error),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Interface for commission-engine persistence.
///
/// Every method that touches more than one row executes as a single atomic
/// unit: the SQL backends wrap it in a transaction, the in-memory backend
/// holds its write lock for the duration. An error from any method means
/// no state changed.
///
/// Implementations:
/// - `SqliteCommissionStore`: SQLite storage
/// - `PostgresCommissionStore`: PostgreSQL storage
/// - `MemoryStore`: in-memory, for tests and embedding
#[async_trait]
pub trait CommissionStore: Send + Sync {
    // --- affiliates ---

    /// Insert a new affiliate. Fails with `DuplicateCode` if the referral
    /// code is taken.
    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<()>;

    async fn affiliate(&self, id: Uuid) -> Result<Option<Affiliate>>;

    async fn affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>>;

    /// Ids of affiliates whose parent pointer is `id`.
    async fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>>;

    /// Soft activation toggle. Affiliates are never hard-deleted.
    async fn set_affiliate_active(&self, id: Uuid, active: bool) -> Result<()>;

    /// Write back the denormalized referral counters.
    async fn update_counters(&self, id: Uuid, direct: u32, downline: u32) -> Result<()>;

    async fn ledger(&self, id: Uuid) -> Result<Option<LedgerSnapshot>>;

    // --- rate schedule ---

    /// Active rate rows ordered by level ascending.
    async fn active_schedule(&self) -> Result<Vec<CommissionRateSetting>>;

    /// Deactivate the current schedule and insert the replacement, as one
    /// atomic operation. Old rows are kept for historical accuracy.
    async fn replace_schedule(&self, rows: &[CommissionRateSetting]) -> Result<()>;

    // --- sales ---

    /// Insert a new sale. Fails with `DuplicateReference` before any other
    /// state changes if the reference is already recorded.
    async fn insert_sale(&self, sale: &AffiliateSale) -> Result<()>;

    async fn sale(&self, id: Uuid) -> Result<Option<AffiliateSale>>;

    async fn sale_by_reference(&self, reference: &str) -> Result<Option<AffiliateSale>>;

    /// Transition a sale out of `Pending`. Fails with `VerificationSettled`
    /// if the sale was already decided, guarding against concurrent review.
    async fn set_verification(&self, id: Uuid, status: VerificationStatus) -> Result<()>;

    // --- commissions ---

    async fn commissions_for_sale(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>>;

    /// Insert one distribution batch and credit each affiliate's pending
    /// balance, atomically.
    ///
    /// Re-checks inside the transaction that no non-cancelled row exists
    /// for the sale; fails with `BatchExists` otherwise. A partial unique
    /// index on `(sale_id, level)` over non-cancelled rows backstops the
    /// re-check against races the transaction isolation does not cover.
    async fn insert_commission_batch(
        &self,
        sale_id: Uuid,
        allocations: &[CommissionAllocation],
    ) -> Result<Vec<CommissionRecord>>;

    /// Settle the pending batch for a sale: rows to `Paid`, and for each
    /// affiliate `total_earnings += a; available_balance += a;
    /// pending_balance -= a`, plus the sale's `commissions_paid` flag,
    /// all atomically. Fails with `BatchAlreadyPaid` or `BatchMissing`.
    async fn release_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>>;

    /// Reverse the pending batch for a sale: rows to `Cancelled` and
    /// pending balances decremented, atomically. Paid batches are never
    /// reversed; fails with `BatchAlreadyPaid` or `BatchMissing`.
    async fn cancel_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>>;
}

/// Parse a decimal persisted as text, attributing failures to a column.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn parse_decimal(column: &'static str, value: &str) -> Result<rust_decimal::Decimal> {
    value.parse().map_err(|_| StorageError::InvalidDecimal {
        column,
        value: value.to_string(),
    })
}
