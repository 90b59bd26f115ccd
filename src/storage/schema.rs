//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query
//! building, plus the DDL both SQL backends share. The partial unique
//! index on `commissions (sale_id, level)` is the required backstop for
//! the at-most-one-non-cancelled-batch invariant.

use sea_query::Iden;

/// Affiliates table schema.
#[derive(Iden)]
pub enum Affiliates {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "referral_code"]
    ReferralCode,
    #[iden = "parent_id"]
    ParentId,
    #[iden = "total_earnings"]
    TotalEarnings,
    #[iden = "available_balance"]
    AvailableBalance,
    #[iden = "pending_balance"]
    PendingBalance,
    #[iden = "direct_referrals"]
    DirectReferrals,
    #[iden = "total_downline"]
    TotalDownline,
    #[iden = "is_active"]
    IsActive,
    #[iden = "created_at"]
    CreatedAt,
}

/// Commission rate settings table schema.
#[derive(Iden)]
pub enum RateSettings {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "level"]
    Level,
    #[iden = "rate"]
    Rate,
    #[iden = "max_total_rate"]
    MaxTotalRate,
    #[iden = "is_active"]
    IsActive,
    #[iden = "created_at"]
    CreatedAt,
}

/// Affiliate sales table schema.
#[derive(Iden)]
pub enum Sales {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sale_reference"]
    SaleReference,
    #[iden = "affiliate_id"]
    AffiliateId,
    #[iden = "sale_amount"]
    SaleAmount,
    #[iden = "payment_method"]
    PaymentMethod,
    #[iden = "verification_status"]
    VerificationStatus,
    #[iden = "commissions_paid"]
    CommissionsPaid,
    #[iden = "created_at"]
    CreatedAt,
}

/// Commission records table schema.
#[derive(Iden)]
pub enum Commissions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sale_id"]
    SaleId,
    #[iden = "affiliate_id"]
    AffiliateId,
    #[iden = "level"]
    Level,
    #[iden = "commission_rate"]
    CommissionRate,
    #[iden = "commission_amount"]
    CommissionAmount,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
}

/// DDL statements, one per statement, valid for both SQLite and
/// PostgreSQL. Monetary values are canonical decimal text; booleans are
/// 0/1 integers so the two backends read identically.
pub const CREATE_TABLES: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS affiliates (
    id TEXT PRIMARY KEY,
    referral_code TEXT NOT NULL UNIQUE,
    parent_id TEXT,
    total_earnings TEXT NOT NULL,
    available_balance TEXT NOT NULL,
    pending_balance TEXT NOT NULL,
    direct_referrals INTEGER NOT NULL DEFAULT 0,
    total_downline INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_affiliates_parent ON affiliates(parent_id)",
    r#"
CREATE TABLE IF NOT EXISTS rate_settings (
    id TEXT PRIMARY KEY,
    level INTEGER NOT NULL,
    rate TEXT NOT NULL,
    max_total_rate TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_rate_settings_active_level \
     ON rate_settings(level) WHERE is_active = 1",
    r#"
CREATE TABLE IF NOT EXISTS sales (
    id TEXT PRIMARY KEY,
    sale_reference TEXT NOT NULL UNIQUE,
    affiliate_id TEXT NOT NULL,
    sale_amount TEXT NOT NULL,
    payment_method TEXT NOT NULL,
    verification_status TEXT NOT NULL,
    commissions_paid INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_sales_affiliate ON sales(affiliate_id)",
    r#"
CREATE TABLE IF NOT EXISTS commissions (
    id TEXT PRIMARY KEY,
    sale_id TEXT NOT NULL,
    affiliate_id TEXT NOT NULL,
    level INTEGER NOT NULL,
    commission_rate TEXT NOT NULL,
    commission_amount TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_commissions_sale ON commissions(sale_id)",
    "CREATE INDEX IF NOT EXISTS idx_commissions_affiliate ON commissions(affiliate_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_commissions_sale_level \
     ON commissions(sale_id, level) WHERE status <> 'CANCELLED'",
];
