//! SQLite implementation of the commission store.
//!
//! All multi-row mutations run inside a single transaction. SQLite's
//! single-writer transaction semantics plus the partial unique index on
//! `commissions (sale_id, level)` enforce the one-batch-per-sale
//! invariant under concurrent callers. On a multi-connection pool a
//! distributor that loses the write lock mid-batch reports the batch
//! conflict rather than a raw busy/locked error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Acquire, Row, SqlitePool};
use uuid::Uuid;

use crate::distributor::CommissionAllocation;
use crate::interfaces::store::{parse_decimal, CommissionStore, Result, StorageError};
use crate::types::{
    Affiliate, AffiliateSale, CommissionRateSetting, CommissionRecord, CommissionStatus,
    LedgerSnapshot, VerificationStatus,
};

use super::schema::{Affiliates, Commissions, RateSettings, Sales, CREATE_TABLES};

/// SQLite implementation of `CommissionStore`.
pub struct SqliteCommissionStore {
    pool: SqlitePool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), primary or extended codes.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<u32>().ok())
        .is_some_and(|code| matches!(code & 0xFF, 5 | 6))
}

/// A write-lock loss inside the batch insert means another distributor
/// holds or just committed the batch; report the conflict, not the
/// transport error.
fn lock_as_batch_exists(err: StorageError, sale_id: Uuid) -> StorageError {
    match err {
        StorageError::Database(e) if is_lock_contention(&e) => StorageError::BatchExists { sale_id },
        other => other,
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(value)?)
}

fn map_affiliate(row: &SqliteRow) -> Result<Affiliate> {
    let parent: Option<String> = row.get("parent_id");
    Ok(Affiliate {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        referral_code: row.get("referral_code"),
        parent_id: parent.as_deref().map(parse_uuid).transpose()?,
        total_earnings: parse_decimal("total_earnings", &row.get::<String, _>("total_earnings"))?,
        available_balance: parse_decimal(
            "available_balance",
            &row.get::<String, _>("available_balance"),
        )?,
        pending_balance: parse_decimal(
            "pending_balance",
            &row.get::<String, _>("pending_balance"),
        )?,
        direct_referrals: row.get::<i64, _>("direct_referrals") as u32,
        total_downline: row.get::<i64, _>("total_downline") as u32,
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn map_sale(row: &SqliteRow) -> Result<AffiliateSale> {
    let status: String = row.get("verification_status");
    Ok(AffiliateSale {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        sale_reference: row.get("sale_reference"),
        affiliate_id: parse_uuid(&row.get::<String, _>("affiliate_id"))?,
        sale_amount: parse_decimal("sale_amount", &row.get::<String, _>("sale_amount"))?,
        payment_method: serde_json::from_str(&row.get::<String, _>("payment_method"))?,
        verification_status: VerificationStatus::parse(&status).ok_or(
            StorageError::InvalidStatus {
                column: "verification_status",
                value: status.clone(),
            },
        )?,
        commissions_paid: row.get::<i64, _>("commissions_paid") != 0,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn map_rate_setting(row: &SqliteRow) -> Result<CommissionRateSetting> {
    Ok(CommissionRateSetting {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        level: row.get::<i64, _>("level") as u32,
        rate: parse_decimal("rate", &row.get::<String, _>("rate"))?,
        max_total_rate: parse_decimal("max_total_rate", &row.get::<String, _>("max_total_rate"))?,
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn map_commission(row: &SqliteRow) -> Result<CommissionRecord> {
    let status: String = row.get("status");
    Ok(CommissionRecord {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        sale_id: parse_uuid(&row.get::<String, _>("sale_id"))?,
        affiliate_id: parse_uuid(&row.get::<String, _>("affiliate_id"))?,
        level: row.get::<i64, _>("level") as u32,
        commission_rate: parse_decimal(
            "commission_rate",
            &row.get::<String, _>("commission_rate"),
        )?,
        commission_amount: parse_decimal(
            "commission_amount",
            &row.get::<String, _>("commission_amount"),
        )?,
        status: CommissionStatus::parse(&status).ok_or(StorageError::InvalidStatus {
            column: "status",
            value: status.clone(),
        })?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn select_commissions_for_sale(sale_id: Uuid) -> String {
    Query::select()
        .columns([
            Commissions::Id,
            Commissions::SaleId,
            Commissions::AffiliateId,
            Commissions::Level,
            Commissions::CommissionRate,
            Commissions::CommissionAmount,
            Commissions::Status,
            Commissions::CreatedAt,
        ])
        .from(Commissions::Table)
        .and_where(Expr::col(Commissions::SaleId).eq(sale_id.to_string()))
        .order_by(Commissions::Level, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

async fn ledger_in_tx(
    conn: &mut sqlx::SqliteConnection,
    affiliate_id: Uuid,
) -> Result<LedgerSnapshot> {
    let query = Query::select()
        .columns([
            Affiliates::TotalEarnings,
            Affiliates::AvailableBalance,
            Affiliates::PendingBalance,
        ])
        .from(Affiliates::Table)
        .and_where(Expr::col(Affiliates::Id).eq(affiliate_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::RowMissing {
            entity: "affiliate",
            id: affiliate_id,
        })?;

    Ok(LedgerSnapshot {
        total_earnings: parse_decimal("total_earnings", &row.get::<String, _>("total_earnings"))?,
        available_balance: parse_decimal(
            "available_balance",
            &row.get::<String, _>("available_balance"),
        )?,
        pending_balance: parse_decimal(
            "pending_balance",
            &row.get::<String, _>("pending_balance"),
        )?,
    })
}

async fn write_ledger_in_tx(
    conn: &mut sqlx::SqliteConnection,
    affiliate_id: Uuid,
    ledger: LedgerSnapshot,
) -> Result<()> {
    let query = Query::update()
        .table(Affiliates::Table)
        .value(Affiliates::TotalEarnings, ledger.total_earnings.to_string())
        .value(
            Affiliates::AvailableBalance,
            ledger.available_balance.to_string(),
        )
        .value(
            Affiliates::PendingBalance,
            ledger.pending_balance.to_string(),
        )
        .and_where(Expr::col(Affiliates::Id).eq(affiliate_id.to_string()))
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(conn).await?;
    Ok(())
}

impl SqliteCommissionStore {
    /// Create a new SQLite commission store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Load the commission batch for a sale inside a transaction and split
    /// it into pending rows, failing on paid or absent batches.
    async fn pending_batch_in_tx(
        conn: &mut sqlx::SqliteConnection,
        sale_id: Uuid,
    ) -> Result<Vec<CommissionRecord>> {
        let rows = sqlx::query(&select_commissions_for_sale(sale_id))
            .fetch_all(&mut *conn)
            .await?;

        let mut pending = Vec::new();
        let mut any_paid = false;
        for row in &rows {
            let record = map_commission(row)?;
            match record.status {
                CommissionStatus::Paid => any_paid = true,
                CommissionStatus::Pending => pending.push(record),
                CommissionStatus::Cancelled => {}
            }
        }

        if any_paid {
            return Err(StorageError::BatchAlreadyPaid { sale_id });
        }
        if pending.is_empty() {
            return Err(StorageError::BatchMissing { sale_id });
        }
        Ok(pending)
    }
}

#[async_trait]
impl CommissionStore for SqliteCommissionStore {
    async fn insert_affiliate(&self, affiliate: &Affiliate) -> Result<()> {
        let query = Query::insert()
            .into_table(Affiliates::Table)
            .columns([
                Affiliates::Id,
                Affiliates::ReferralCode,
                Affiliates::ParentId,
                Affiliates::TotalEarnings,
                Affiliates::AvailableBalance,
                Affiliates::PendingBalance,
                Affiliates::DirectReferrals,
                Affiliates::TotalDownline,
                Affiliates::IsActive,
                Affiliates::CreatedAt,
            ])
            .values_panic([
                affiliate.id.to_string().into(),
                affiliate.referral_code.clone().into(),
                affiliate.parent_id.map(|p| p.to_string()).into(),
                affiliate.total_earnings.to_string().into(),
                affiliate.available_balance.to_string().into(),
                affiliate.pending_balance.to_string().into(),
                affiliate.direct_referrals.into(),
                affiliate.total_downline.into(),
                i32::from(affiliate.is_active).into(),
                affiliate.created_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateCode(affiliate.referral_code.clone())
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    async fn affiliate(&self, id: Uuid) -> Result<Option<Affiliate>> {
        let query = Query::select()
            .columns([
                Affiliates::Id,
                Affiliates::ReferralCode,
                Affiliates::ParentId,
                Affiliates::TotalEarnings,
                Affiliates::AvailableBalance,
                Affiliates::PendingBalance,
                Affiliates::DirectReferrals,
                Affiliates::TotalDownline,
                Affiliates::IsActive,
                Affiliates::CreatedAt,
            ])
            .from(Affiliates::Table)
            .and_where(Expr::col(Affiliates::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_affiliate).transpose()
    }

    async fn affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>> {
        let query = Query::select()
            .columns([
                Affiliates::Id,
                Affiliates::ReferralCode,
                Affiliates::ParentId,
                Affiliates::TotalEarnings,
                Affiliates::AvailableBalance,
                Affiliates::PendingBalance,
                Affiliates::DirectReferrals,
                Affiliates::TotalDownline,
                Affiliates::IsActive,
                Affiliates::CreatedAt,
            ])
            .from(Affiliates::Table)
            .and_where(Expr::col(Affiliates::ReferralCode).eq(code))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_affiliate).transpose()
    }

    async fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let query = Query::select()
            .column(Affiliates::Id)
            .from(Affiliates::Table)
            .and_where(Expr::col(Affiliates::ParentId).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            children.push(parse_uuid(&row.get::<String, _>("id"))?);
        }
        Ok(children)
    }

    async fn set_affiliate_active(&self, id: Uuid, active: bool) -> Result<()> {
        let query = Query::update()
            .table(Affiliates::Table)
            .value(Affiliates::IsActive, i32::from(active))
            .and_where(Expr::col(Affiliates::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::RowMissing {
                entity: "affiliate",
                id,
            });
        }
        Ok(())
    }

    async fn update_counters(&self, id: Uuid, direct: u32, downline: u32) -> Result<()> {
        let query = Query::update()
            .table(Affiliates::Table)
            .value(Affiliates::DirectReferrals, direct)
            .value(Affiliates::TotalDownline, downline)
            .and_where(Expr::col(Affiliates::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::RowMissing {
                entity: "affiliate",
                id,
            });
        }
        Ok(())
    }

    async fn ledger(&self, id: Uuid) -> Result<Option<LedgerSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        match ledger_in_tx(&mut conn, id).await {
            Ok(ledger) => Ok(Some(ledger)),
            Err(StorageError::RowMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn active_schedule(&self) -> Result<Vec<CommissionRateSetting>> {
        let query = Query::select()
            .columns([
                RateSettings::Id,
                RateSettings::Level,
                RateSettings::Rate,
                RateSettings::MaxTotalRate,
                RateSettings::IsActive,
                RateSettings::CreatedAt,
            ])
            .from(RateSettings::Table)
            .and_where(Expr::col(RateSettings::IsActive).eq(1))
            .order_by(RateSettings::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut schedule = Vec::with_capacity(rows.len());
        for row in &rows {
            schedule.push(map_rate_setting(row)?);
        }
        Ok(schedule)
    }

    async fn replace_schedule(&self, rows: &[CommissionRateSetting]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        // Old settings are deactivated, not mutated, to preserve history.
        let deactivate = Query::update()
            .table(RateSettings::Table)
            .value(RateSettings::IsActive, 0)
            .and_where(Expr::col(RateSettings::IsActive).eq(1))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&deactivate).execute(&mut *tx).await?;

        for setting in rows {
            let insert = Query::insert()
                .into_table(RateSettings::Table)
                .columns([
                    RateSettings::Id,
                    RateSettings::Level,
                    RateSettings::Rate,
                    RateSettings::MaxTotalRate,
                    RateSettings::IsActive,
                    RateSettings::CreatedAt,
                ])
                .values_panic([
                    setting.id.to_string().into(),
                    setting.level.into(),
                    setting.rate.to_string().into(),
                    setting.max_total_rate.to_string().into(),
                    i32::from(setting.is_active).into(),
                    setting.created_at.to_rfc3339().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&insert).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_sale(&self, sale: &AffiliateSale) -> Result<()> {
        let payment = serde_json::to_string(&sale.payment_method)?;
        let query = Query::insert()
            .into_table(Sales::Table)
            .columns([
                Sales::Id,
                Sales::SaleReference,
                Sales::AffiliateId,
                Sales::SaleAmount,
                Sales::PaymentMethod,
                Sales::VerificationStatus,
                Sales::CommissionsPaid,
                Sales::CreatedAt,
            ])
            .values_panic([
                sale.id.to_string().into(),
                sale.sale_reference.clone().into(),
                sale.affiliate_id.to_string().into(),
                sale.sale_amount.to_string().into(),
                payment.into(),
                sale.verification_status.as_str().into(),
                i32::from(sale.commissions_paid).into(),
                sale.created_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateReference(sale.sale_reference.clone())
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    async fn sale(&self, id: Uuid) -> Result<Option<AffiliateSale>> {
        let query = Query::select()
            .columns([
                Sales::Id,
                Sales::SaleReference,
                Sales::AffiliateId,
                Sales::SaleAmount,
                Sales::PaymentMethod,
                Sales::VerificationStatus,
                Sales::CommissionsPaid,
                Sales::CreatedAt,
            ])
            .from(Sales::Table)
            .and_where(Expr::col(Sales::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_sale).transpose()
    }

    async fn sale_by_reference(&self, reference: &str) -> Result<Option<AffiliateSale>> {
        let query = Query::select()
            .columns([
                Sales::Id,
                Sales::SaleReference,
                Sales::AffiliateId,
                Sales::SaleAmount,
                Sales::PaymentMethod,
                Sales::VerificationStatus,
                Sales::CommissionsPaid,
                Sales::CreatedAt,
            ])
            .from(Sales::Table)
            .and_where(Expr::col(Sales::SaleReference).eq(reference))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_sale).transpose()
    }

    async fn set_verification(&self, id: Uuid, status: VerificationStatus) -> Result<()> {
        // Guarded transition: only a pending sale may be decided.
        let query = Query::update()
            .table(Sales::Table)
            .value(Sales::VerificationStatus, status.as_str())
            .and_where(Expr::col(Sales::Id).eq(id.to_string()))
            .and_where(
                Expr::col(Sales::VerificationStatus).eq(VerificationStatus::Pending.as_str()),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return match self.sale(id).await? {
                Some(_) => Err(StorageError::VerificationSettled { sale_id: id }),
                None => Err(StorageError::RowMissing { entity: "sale", id }),
            };
        }
        Ok(())
    }

    async fn commissions_for_sale(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let rows = sqlx::query(&select_commissions_for_sale(sale_id))
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(map_commission(row)?);
        }
        Ok(records)
    }

    async fn insert_commission_batch(
        &self,
        sale_id: Uuid,
        allocations: &[CommissionAllocation],
    ) -> Result<Vec<CommissionRecord>> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        // Mandatory re-check inside the transaction: the outer pre-check
        // alone is racy between concurrent distribute calls.
        let count_query = Query::select()
            .expr(Expr::col(Commissions::Id).count())
            .from(Commissions::Table)
            .and_where(Expr::col(Commissions::SaleId).eq(sale_id.to_string()))
            .and_where(Expr::col(Commissions::Status).ne(CommissionStatus::Cancelled.as_str()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&count_query)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| lock_as_batch_exists(e.into(), sale_id))?;
        let existing: i64 = row.get(0);
        if existing > 0 {
            return Err(StorageError::BatchExists { sale_id });
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(allocations.len());

        for allocation in allocations {
            let record = CommissionRecord {
                id: Uuid::new_v4(),
                sale_id,
                affiliate_id: allocation.affiliate_id,
                level: allocation.level,
                commission_rate: allocation.rate,
                commission_amount: allocation.amount,
                status: CommissionStatus::Pending,
                created_at: now,
            };

            let insert = Query::insert()
                .into_table(Commissions::Table)
                .columns([
                    Commissions::Id,
                    Commissions::SaleId,
                    Commissions::AffiliateId,
                    Commissions::Level,
                    Commissions::CommissionRate,
                    Commissions::CommissionAmount,
                    Commissions::Status,
                    Commissions::CreatedAt,
                ])
                .values_panic([
                    record.id.to_string().into(),
                    record.sale_id.to_string().into(),
                    record.affiliate_id.to_string().into(),
                    record.level.into(),
                    record.commission_rate.to_string().into(),
                    record.commission_amount.to_string().into(),
                    record.status.as_str().into(),
                    record.created_at.to_rfc3339().into(),
                ])
                .to_string(SqliteQueryBuilder);

            // The partial unique index turns a lost race into a conflict
            // instead of a duplicate batch. Likewise a busy/locked error
            // on a multi-connection pool: the other writer owns the batch.
            sqlx::query(&insert).execute(&mut *tx).await.map_err(|e| {
                if is_unique_violation(&e) || is_lock_contention(&e) {
                    StorageError::BatchExists { sale_id }
                } else {
                    e.into()
                }
            })?;

            let mut ledger = ledger_in_tx(&mut tx, allocation.affiliate_id)
                .await
                .map_err(|e| lock_as_batch_exists(e, sale_id))?;
            ledger.pending_balance += allocation.amount;
            write_ledger_in_tx(&mut tx, allocation.affiliate_id, ledger)
                .await
                .map_err(|e| lock_as_batch_exists(e, sale_id))?;

            records.push(record);
        }

        tx.commit()
            .await
            .map_err(|e| lock_as_batch_exists(e.into(), sale_id))?;
        Ok(records)
    }

    async fn release_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let pending = Self::pending_batch_in_tx(&mut tx, sale_id).await?;

        let update = Query::update()
            .table(Commissions::Table)
            .value(Commissions::Status, CommissionStatus::Paid.as_str())
            .and_where(Expr::col(Commissions::SaleId).eq(sale_id.to_string()))
            .and_where(Expr::col(Commissions::Status).eq(CommissionStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&update).execute(&mut *tx).await?;

        for record in &pending {
            let mut ledger = ledger_in_tx(&mut tx, record.affiliate_id).await?;
            if ledger.pending_balance < record.commission_amount {
                return Err(StorageError::LedgerUnderflow {
                    affiliate_id: record.affiliate_id,
                });
            }
            ledger.pending_balance -= record.commission_amount;
            ledger.available_balance += record.commission_amount;
            ledger.total_earnings += record.commission_amount;
            write_ledger_in_tx(&mut tx, record.affiliate_id, ledger).await?;
        }

        let flag = Query::update()
            .table(Sales::Table)
            .value(Sales::CommissionsPaid, 1)
            .and_where(Expr::col(Sales::Id).eq(sale_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&flag).execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(pending
            .into_iter()
            .map(|mut record| {
                record.status = CommissionStatus::Paid;
                record
            })
            .collect())
    }

    async fn cancel_batch(&self, sale_id: Uuid) -> Result<Vec<CommissionRecord>> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let pending = Self::pending_batch_in_tx(&mut tx, sale_id).await?;

        let update = Query::update()
            .table(Commissions::Table)
            .value(Commissions::Status, CommissionStatus::Cancelled.as_str())
            .and_where(Expr::col(Commissions::SaleId).eq(sale_id.to_string()))
            .and_where(Expr::col(Commissions::Status).eq(CommissionStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&update).execute(&mut *tx).await?;

        for record in &pending {
            let mut ledger = ledger_in_tx(&mut tx, record.affiliate_id).await?;
            if ledger.pending_balance < record.commission_amount {
                return Err(StorageError::LedgerUnderflow {
                    affiliate_id: record.affiliate_id,
                });
            }
            ledger.pending_balance -= record.commission_amount;
            write_ledger_in_tx(&mut tx, record.affiliate_id, ledger).await?;
        }

        tx.commit().await?;

        Ok(pending
            .into_iter()
            .map(|mut record| {
                record.status = CommissionStatus::Cancelled;
                record
            })
            .collect())
    }
}
