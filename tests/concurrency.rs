mod common;

use common::{Harness, dec, movement, transfer};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::time::Duration;
use txn_engine::engine::{EngineError, ErrorKind};
use txn_engine::ledger::{LedgerStore, LedgerUnit, MovementType};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn qa_same_key_race_executes_once() {
    let h = Harness::new();
    h.open("A1", "ARS", "0", None).await;

    let tasks = (0..32).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .create_transaction(Some("race-key"), movement("A1", MovementType::Deposit, "10", "ARS"))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let created = results
        .iter()
        .filter(|r| matches!(r, Ok(o) if !o.is_replayed()))
        .count();
    assert_eq!(created, 1, "exactly one execution");
    for r in &results {
        match r {
            Ok(_) => {}
            Err(EngineError::IdempotencyConflict(k)) => assert_eq!(k, "race-key"),
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }

    assert_eq!(h.ledger.journal_len(), 1);
    assert_eq!(h.balance("A1").await, dec("10"));

    // Once settled, every retry replays the stored response
    let replay = h
        .service
        .create_transaction(Some("race-key"), movement("A1", MovementType::Deposit, "10", "ARS"))
        .await
        .unwrap();
    assert!(replay.is_replayed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn qa_concurrent_withdrawals_never_overdraw() {
    let h = Harness::new();
    h.open("A1", "USD", "1000", None).await;

    let tasks = (0..20).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .create_transaction(None, movement("A1", MovementType::Withdrawal, "100", "USD"))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::InsufficientBalance { .. })))
        .count();
    assert_eq!(ok, 10);
    assert_eq!(rejected, 10);
    assert_eq!(h.balance("A1").await, Decimal::ZERO);
    assert_eq!(h.ledger.journal_len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn qa_opposite_transfers_do_not_deadlock() {
    // Short lock timeout: a circular wait would surface as LOCK_TIMEOUT
    let h = Harness::with_lock_timeout(Duration::from_secs(2));
    h.open("A", "USD", "10000", None).await;
    h.open("B", "USD", "10000", None).await;

    let tasks = (0..50).map(|i| {
        let service = h.service.clone();
        let (from, to) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
        tokio::spawn(async move { service.transfer(None, transfer(from, to, "7")).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    for r in &results {
        assert!(r.is_ok(), "transfer failed: {:?}", r);
    }
    // 25 each way: net zero, and value is conserved
    assert_eq!(h.balance("A").await, dec("10000"));
    assert_eq!(h.balance("B").await, dec("10000"));
    assert_eq!(h.ledger.journal_len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn qa_distinct_keys_all_execute() {
    let h = Harness::new();
    h.open("A1", "ARS", "0", None).await;

    let tasks = (0..16).map(|i| {
        let service = h.service.clone();
        tokio::spawn(async move {
            let key = format!("key-{}", i);
            service
                .create_transaction(Some(key.as_str()), movement("A1", MovementType::Deposit, "1", "ARS"))
                .await
        })
    });
    for r in join_all(tasks).await {
        assert!(!r.unwrap().unwrap().is_replayed());
    }
    assert_eq!(h.balance("A1").await, dec("16"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_abandoned_caller_still_completes_keyed_movement() {
    let h = Harness::new();
    h.open("A1", "ARS", "100", None).await;

    // Hold A1 so the keyed deposit is parked on the row lock
    let mut holder = h.ledger.begin().await.unwrap();
    holder.find_for_update("A1").await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.service
            .create_transaction(Some("k-abandon"), movement("A1", MovementType::Deposit, "10", "ARS")),
    )
    .await;
    assert!(abandoned.is_err(), "caller should have timed out");
    drop(holder);

    // The movement finishes in the background and the key settles to its
    // stored response; a retry never executes it again
    let mut replayed = None;
    for _ in 0..200 {
        match h
            .service
            .create_transaction(Some("k-abandon"), movement("A1", MovementType::Deposit, "10", "ARS"))
            .await
        {
            Ok(outcome) => {
                replayed = Some(outcome);
                break;
            }
            Err(EngineError::IdempotencyConflict(_)) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }
    let replayed = replayed.expect("key never settled");
    assert!(replayed.is_replayed());
    assert_eq!(replayed.get().amount, dec("10"));
    assert_eq!(h.balance("A1").await, dec("110"));
    assert_eq!(h.ledger.journal_len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_lock_wait_timeout_is_retryable_and_releases_key() {
    let h = Harness::with_lock_timeout(Duration::from_millis(50));
    h.open("A1", "ARS", "100", None).await;

    let mut holder = h.ledger.begin().await.unwrap();
    holder.find_for_update("A1").await.unwrap();

    let err = h
        .service
        .create_transaction(Some("k-timeout"), movement("A1", MovementType::Withdrawal, "10", "ARS"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LOCK_TIMEOUT");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());
    assert_eq!(h.ledger.journal_len(), 0);
    assert_eq!(h.balance("A1").await, dec("100"));

    drop(holder);

    // The key was released, so the retry executes
    let retry = h
        .service
        .create_transaction(Some("k-timeout"), movement("A1", MovementType::Withdrawal, "10", "ARS"))
        .await
        .unwrap();
    assert!(!retry.is_replayed());
    assert_eq!(h.balance("A1").await, dec("90"));
}
