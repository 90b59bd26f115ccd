//! Engine behavior over the SQLite backend.
//!
//! Each test opens its own `sqlite::memory:` pool capped at one
//! connection, because every pooled connection would otherwise get an
//! independent empty database.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use rust_decimal_macros::dec;
use sqlx::sqlite::SqlitePoolOptions;

use affiliate_engine::error::EngineError;
use affiliate_engine::storage::SqliteCommissionStore;
use affiliate_engine::types::{CommissionStatus, PaymentMethod, VerificationOutcome};
use affiliate_engine::CommissionEngine;

async fn engine() -> CommissionEngine {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteCommissionStore::new(pool);
    store.init().await.unwrap();
    CommissionEngine::new(Arc::new(store))
}

fn card() -> PaymentMethod {
    PaymentMethod::Card {
        brand: "visa".into(),
        last4: "4242".into(),
    }
}

#[tokio::test]
async fn lifecycle_round_trips_through_sqlite() {
    let engine = engine().await;
    engine
        .replace_schedule(&[dec!(10), dec!(5), dec!(2.5)], dec!(25))
        .await
        .unwrap();

    let root = engine.enroll_affiliate(None).await.unwrap();
    let mid = engine
        .enroll_affiliate(Some(&root.referral_code))
        .await
        .unwrap();
    let seller = engine
        .enroll_affiliate(Some(&mid.referral_code))
        .await
        .unwrap();

    let sale = engine
        .record_sale(seller.id, "SQL-1", dec!(1000), card())
        .await
        .unwrap();

    // Everything survives a re-read from disk representation.
    let reread = engine.sale_by_reference("SQL-1").await.unwrap().unwrap();
    assert_eq!(reread.id, sale.id);
    assert_eq!(reread.sale_amount, dec!(1000));
    assert_eq!(reread.payment_method, card());

    engine
        .verify_sale(sale.id, VerificationOutcome::Verified)
        .await
        .unwrap();
    let records = engine.distribute(sale.id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].commission_amount, dec!(25.00));
    assert!(records.iter().all(|r| r.status == CommissionStatus::Pending));

    engine.release(sale.id).await.unwrap();

    let ledger = engine.ledger(root.id).await.unwrap();
    assert_eq!(ledger.available_balance, dec!(25.00));
    assert_eq!(ledger.pending_balance, dec!(0.00));
    assert_eq!(ledger.total_earnings, dec!(25.00));

    let records = engine.commissions_for_sale(sale.id).await.unwrap();
    assert!(records.iter().all(|r| r.status == CommissionStatus::Paid));
}

#[tokio::test]
async fn duplicate_reference_hits_the_unique_constraint() {
    let engine = engine().await;
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let seller = engine.enroll_affiliate(None).await.unwrap();
    engine
        .record_sale(seller.id, "SQL-2", dec!(100), card())
        .await
        .unwrap();

    let err = engine
        .record_sale(seller.id, "SQL-2", dec!(100), card())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateReference(_)));
}

#[tokio::test]
async fn concurrent_distribute_yields_one_batch() {
    let engine = engine().await;
    engine
        .replace_schedule(&[dec!(10), dec!(5)], dec!(25))
        .await
        .unwrap();

    let parent = engine.enroll_affiliate(None).await.unwrap();
    let seller = engine
        .enroll_affiliate(Some(&parent.referral_code))
        .await
        .unwrap();

    let sale = engine
        .record_sale(seller.id, "SQL-3", dec!(400), card())
        .await
        .unwrap();
    engine
        .verify_sale(sale.id, VerificationOutcome::Verified)
        .await
        .unwrap();

    let (a, b) = tokio::join!(engine.distribute(sale.id), engine.distribute(sale.id));

    let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1);
    for result in [a, b] {
        if let Err(e) = result {
            assert!(matches!(e, EngineError::AlreadyDistributed(_)));
        }
    }

    let records = engine.commissions_for_sale(sale.id).await.unwrap();
    assert_eq!(records.len(), 2);

    let ledger = engine.ledger(seller.id).await.unwrap();
    assert_eq!(ledger.pending_balance, dec!(40.00));
}

#[tokio::test]
async fn cancel_then_redistribute_reuses_the_sale() {
    let engine = engine().await;
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let seller = engine.enroll_affiliate(None).await.unwrap();
    let sale = engine
        .record_sale(seller.id, "SQL-4", dec!(250), card())
        .await
        .unwrap();
    engine
        .verify_sale(sale.id, VerificationOutcome::Verified)
        .await
        .unwrap();

    engine.distribute(sale.id).await.unwrap();
    engine.cancel(sale.id).await.unwrap();

    let ledger = engine.ledger(seller.id).await.unwrap();
    assert_eq!(ledger.pending_balance, dec!(0.00));

    // The partial unique index ignores cancelled rows, so a second
    // distribution is allowed.
    engine.distribute(sale.id).await.unwrap();
    engine.release(sale.id).await.unwrap();

    let records = engine.commissions_for_sale(sale.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == CommissionStatus::Paid)
            .count(),
        1
    );
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == CommissionStatus::Cancelled)
            .count(),
        1
    );

    let ledger = engine.ledger(seller.id).await.unwrap();
    assert_eq!(ledger.total_earnings, dec!(25.00));
}

#[tokio::test]
async fn enrollment_counters_persist() {
    let engine = engine().await;

    let parent = engine.enroll_affiliate(None).await.unwrap();
    for _ in 0..3 {
        engine
            .enroll_affiliate(Some(&parent.referral_code))
            .await
            .unwrap();
    }

    let parent = engine.affiliate(parent.id).await.unwrap();
    assert_eq!(parent.direct_referrals, 3);
    assert_eq!(parent.total_downline, 3);

    let stats = engine.downline_stats(parent.id).await.unwrap();
    assert_eq!(stats.direct_referrals, 3);
}

#[tokio::test]
async fn verification_settles_exactly_once() {
    let engine = engine().await;
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let seller = engine.enroll_affiliate(None).await.unwrap();
    let sale = engine
        .record_sale(seller.id, "SQL-5", dec!(100), card())
        .await
        .unwrap();

    engine
        .verify_sale(sale.id, VerificationOutcome::Verified)
        .await
        .unwrap();
    let err = engine
        .verify_sale(sale.id, VerificationOutcome::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyVerified(_)));
}

#[tokio::test]
async fn schedule_replacement_deactivates_old_rows() {
    let engine = engine().await;
    engine
        .replace_schedule(&[dec!(10), dec!(5)], dec!(25))
        .await
        .unwrap();
    engine
        .replace_schedule(&[dec!(8)], dec!(20))
        .await
        .unwrap();

    let seller = engine.enroll_affiliate(None).await.unwrap();
    let plan = engine.preview(seller.id, dec!(100)).await.unwrap();

    assert_eq!(plan.allocations.len(), 1);
    assert_eq!(plan.allocations[0].rate, dec!(8));
    assert_eq!(plan.total_amount, dec!(8.00));
}
