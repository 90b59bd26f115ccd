//! End-to-end engine behavior over the in-memory store.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use affiliate_engine::error::EngineError;
use affiliate_engine::storage::MemoryStore;
use affiliate_engine::types::{PaymentMethod, VerificationOutcome};
use affiliate_engine::CommissionEngine;

fn engine() -> CommissionEngine {
    CommissionEngine::new(Arc::new(MemoryStore::new()))
}

fn bank() -> PaymentMethod {
    PaymentMethod::BankTransfer {
        bank_name: "First National".into(),
        account_last4: "0042".into(),
    }
}

async fn chain(engine: &CommissionEngine, depth: usize) -> Vec<Uuid> {
    let mut ids = Vec::new();
    let mut parent_code: Option<String> = None;
    for _ in 0..depth {
        let affiliate = engine
            .enroll_affiliate(parent_code.as_deref())
            .await
            .unwrap();
        parent_code = Some(affiliate.referral_code.clone());
        ids.push(affiliate.id);
    }
    ids
}

async fn verified_sale(engine: &CommissionEngine, seller: Uuid, reference: &str, amount: Decimal) -> Uuid {
    let sale = engine
        .record_sale(seller, reference, amount, bank())
        .await
        .unwrap();
    engine
        .verify_sale(sale.id, VerificationOutcome::Verified)
        .await
        .unwrap();
    sale.id
}

#[tokio::test]
async fn distribution_respects_cap_and_level_priority() {
    let engine = engine();
    engine
        .replace_schedule(&[dec!(20), dec!(10), dec!(10)], dec!(25))
        .await
        .unwrap();

    // chain[2] is the deepest node, selling under chain[1] under chain[0].
    let ids = chain(&engine, 3).await;
    let sale_id = verified_sale(&engine, ids[2], "CAP-1", dec!(1000)).await;

    let records = engine.distribute(sale_id).await.unwrap();

    // Level 0 takes its full 20%; level 1 gets the 5% headroom; level 2
    // gets nothing.
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].commission_rate, dec!(20));
    assert_eq!(records[0].commission_amount, dec!(200.00));
    assert_eq!(records[1].commission_rate, dec!(5));
    assert_eq!(records[1].commission_amount, dec!(50.00));

    let total: Decimal = records.iter().map(|r| r.commission_rate).sum();
    assert!(total <= dec!(25));
}

#[tokio::test]
async fn concurrent_distribute_produces_exactly_one_batch() {
    let engine = engine();
    engine
        .replace_schedule(&[dec!(10), dec!(5)], dec!(25))
        .await
        .unwrap();

    let ids = chain(&engine, 2).await;
    let sale_id = verified_sale(&engine, ids[1], "RACE-1", dec!(300)).await;

    let (a, b) = tokio::join!(engine.distribute(sale_id), engine.distribute(sale_id));

    let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1);
    for result in [a, b] {
        if let Err(e) = result {
            assert!(matches!(e, EngineError::AlreadyDistributed(_)));
        }
    }

    // Exactly one batch of two levels, no strays.
    let records = engine.commissions_for_sale(sale_id).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn ledger_is_conserved_across_the_lifecycle() {
    let engine = engine();
    engine
        .replace_schedule(&[dec!(10), dec!(5)], dec!(25))
        .await
        .unwrap();

    let ids = chain(&engine, 2).await;
    let parent = ids[0];
    let seller = ids[1];

    let released = verified_sale(&engine, seller, "LED-1", dec!(1000)).await;
    let cancelled = verified_sale(&engine, seller, "LED-2", dec!(1000)).await;

    engine.distribute(released).await.unwrap();
    engine.distribute(cancelled).await.unwrap();

    let ledger = engine.ledger(seller).await.unwrap();
    assert_eq!(ledger.pending_balance, dec!(200.00));

    engine.release(released).await.unwrap();
    engine.cancel(cancelled).await.unwrap();

    let ledger = engine.ledger(seller).await.unwrap();
    assert_eq!(ledger.pending_balance, dec!(0.00));
    assert_eq!(ledger.available_balance, dec!(100.00));
    assert_eq!(ledger.total_earnings, dec!(100.00));

    let upline = engine.ledger(parent).await.unwrap();
    assert_eq!(upline.pending_balance, dec!(0.00));
    assert_eq!(upline.available_balance, dec!(50.00));
    assert_eq!(upline.total_earnings, dec!(50.00));
}

#[tokio::test]
async fn release_is_once_only_and_cancel_after_release_fails() {
    let engine = engine();
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let ids = chain(&engine, 1).await;
    let sale_id = verified_sale(&engine, ids[0], "REL-1", dec!(100)).await;

    engine.distribute(sale_id).await.unwrap();
    engine.release(sale_id).await.unwrap();

    let err = engine.release(sale_id).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyReleased(_)));

    let err = engine.cancel(sale_id).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyReleased(_)));

    let ledger = engine.ledger(ids[0]).await.unwrap();
    assert_eq!(ledger.total_earnings, dec!(10.00));
}

#[tokio::test]
async fn cancel_without_distribution_is_rejected() {
    let engine = engine();
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let ids = chain(&engine, 1).await;
    let sale_id = verified_sale(&engine, ids[0], "CXL-1", dec!(100)).await;

    let err = engine.cancel(sale_id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotDistributed(_)));

    let ledger = engine.ledger(ids[0]).await.unwrap();
    assert_eq!(ledger.pending_balance, dec!(0));
    assert_eq!(ledger.total_earnings, dec!(0));
}

#[tokio::test]
async fn bulk_release_continues_past_failures() {
    let engine = engine();
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let ids = chain(&engine, 1).await;
    let seller = ids[0];

    let ready = verified_sale(&engine, seller, "BULK-1", dec!(100)).await;
    engine.distribute(ready).await.unwrap();

    let undistributed = verified_sale(&engine, seller, "BULK-2", dec!(100)).await;

    let missing = Uuid::new_v4();

    let also_ready = verified_sale(&engine, seller, "BULK-3", dec!(100)).await;
    engine.distribute(also_ready).await.unwrap();

    let results = engine
        .bulk_release(&[ready, undistributed, missing, also_ready])
        .await;

    assert_eq!(results.len(), 4);
    assert!(results[0].1.is_ok());
    assert!(matches!(
        results[1].1.as_ref().unwrap_err(),
        EngineError::NotDistributed(_)
    ));
    assert!(matches!(
        results[2].1.as_ref().unwrap_err(),
        EngineError::SaleNotFound(_)
    ));
    // A failed item does not abort the batch.
    assert!(results[3].1.is_ok());

    let ledger = engine.ledger(seller).await.unwrap();
    assert_eq!(ledger.available_balance, dec!(20.00));
}

#[tokio::test]
async fn preview_has_no_side_effects() {
    let engine = engine();
    engine
        .replace_schedule(&[dec!(10), dec!(5)], dec!(25))
        .await
        .unwrap();

    let ids = chain(&engine, 2).await;
    let plan = engine.preview(ids[1], dec!(500)).await.unwrap();
    assert_eq!(plan.total_amount, dec!(75.00));

    for id in &ids {
        let ledger = engine.ledger(*id).await.unwrap();
        assert_eq!(ledger.pending_balance, dec!(0));
        assert_eq!(ledger.total_earnings, dec!(0));
    }
}

#[tokio::test]
async fn rejected_sale_never_distributes() {
    let engine = engine();
    engine.replace_schedule(&[dec!(10)], dec!(25)).await.unwrap();

    let ids = chain(&engine, 1).await;
    let sale = engine
        .record_sale(ids[0], "REJ-1", dec!(100), bank())
        .await
        .unwrap();
    engine
        .verify_sale(sale.id, VerificationOutcome::Rejected)
        .await
        .unwrap();

    let err = engine.distribute(sale.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotVerified(_)));
    assert!(engine.commissions_for_sale(sale.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn schedule_validation_rejects_bad_input() {
    let engine = engine();

    let err = engine.replace_schedule(&[], dec!(25)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));

    let err = engine
        .replace_schedule(&[dec!(10), dec!(0)], dec!(25))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));

    let err = engine
        .replace_schedule(&[dec!(10)], dec!(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));

    // Cap below the level 0 rate would starve the direct seller.
    let err = engine
        .replace_schedule(&[dec!(30)], dec!(25))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));
}
