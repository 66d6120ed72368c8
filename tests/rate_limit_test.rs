mod common;

use banking_core::domain::{TransactionKind, TransactionStatus};
use banking_core::services::TransferRequest;
use banking_core::BankError;
use chrono::Duration;
use common::{dec, start_time, Harness};
use uuid::Uuid;

fn transfer(user_id: Uuid, amount: &str) -> TransferRequest {
    TransferRequest {
        user_id,
        recipient_account_number: "GB0002".to_string(),
        amount: dec(amount),
        description: "Split bill".to_string(),
    }
}

async fn two_users(h: &Harness) -> (Uuid, Uuid) {
    let alice = h.open("Alice", "GB0001", "10000.00").await;
    let bob = h.open("Bob", "GB0002", "0").await;
    (alice, bob)
}

#[tokio::test]
async fn test_fourth_rapid_transfer_is_blocked() {
    let h = Harness::new();
    let (alice, bob) = two_users(&h).await;

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
        h.clock.advance(Duration::minutes(1));
    }

    let denial = match h.service.transfer(transfer(alice, "10.00")).await {
        Err(BankError::RateLimited(denial)) => denial,
        other => panic!("expected RateLimited, got {:?}", other.map(|r| r.transaction.id)),
    };

    assert!(denial.reason.contains("3/3 in 5 minutes"), "{}", denial.reason);
    assert_eq!(denial.blocked_until, start_time() + Duration::minutes(3) + Duration::minutes(30));
    assert_eq!(denial.minutes_remaining, 30);
    assert!(denial.message().ends_with("Please try again in 30 minutes."));

    assert_eq!(h.balance(alice).await, dec("9970.00"));
    assert_eq!(h.balance(bob).await, dec("30.00"));

    let history = h.service.list_transactions(alice, None).await.unwrap();
    assert_eq!(history.len(), 4);
    let audit = &history[0];
    assert_eq!(audit.kind, TransactionKind::TransferOut);
    assert_eq!(audit.status, TransactionStatus::Blocked);
    assert_eq!(audit.balance_after, dec("9970.00"));
    assert_eq!(audit.block_reason.as_deref(), Some(denial.reason.as_str()));
    assert_eq!(audit.counterparty_ref.as_deref(), Some("GB0002"));
}

#[tokio::test]
async fn test_block_holds_until_cooldown_ends() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
    }
    assert!(matches!(
        h.service.transfer(transfer(alice, "10.00")).await,
        Err(BankError::RateLimited(_))
    ));

    // Still blocked even though the rapid window has emptied.
    h.clock.advance(Duration::minutes(10));
    match h.service.transfer(transfer(alice, "10.00")).await {
        Err(BankError::RateLimited(denial)) => assert_eq!(denial.minutes_remaining, 20),
        other => panic!("expected RateLimited, got {:?}", other.map(|r| r.transaction.id)),
    }

    h.clock.advance(Duration::minutes(21));
    h.service.transfer(transfer(alice, "10.00")).await.unwrap();

    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert!(!status.is_blocked);
    assert_eq!(status.blocked_until, None);
}

#[tokio::test]
async fn test_high_value_transfer_counts_double() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    h.service.transfer(transfer(alice, "1500.00")).await.unwrap();

    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert_eq!(status.rapid.current, 2);
    assert_eq!(status.rapid.remaining, 1);
    assert_eq!(status.hourly.remaining, 8);

    // A second high-value transfer would take the window to 4/3.
    match h.service.transfer(transfer(alice, "1000.01")).await {
        Err(BankError::RateLimited(denial)) => {
            assert!(denial.reason.contains("2/3 in 5 minutes"), "{}", denial.reason)
        }
        other => panic!("expected RateLimited, got {:?}", other.map(|r| r.transaction.id)),
    }
}

#[tokio::test]
async fn test_threshold_amount_itself_is_single_weight() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    h.service.transfer(transfer(alice, "1000.00")).await.unwrap();

    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert_eq!(status.rapid.current, 1);
}

#[tokio::test]
async fn test_hourly_limit_applies_when_spread_out() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    for _ in 0..10 {
        h.service.transfer(transfer(alice, "5.00")).await.unwrap();
        h.clock.advance(Duration::seconds(330));
    }

    match h.service.transfer(transfer(alice, "5.00")).await {
        Err(BankError::RateLimited(denial)) => {
            assert!(denial.reason.contains("10/10 per hour"), "{}", denial.reason)
        }
        other => panic!("expected RateLimited, got {:?}", other.map(|r| r.transaction.id)),
    }
}

#[tokio::test]
async fn test_events_older_than_an_hour_are_pruned() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
    }

    h.clock.advance(Duration::minutes(61));
    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert_eq!(status.rapid.current, 0);
    assert_eq!(status.hourly.current, 0);

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
    }
}

#[tokio::test]
async fn test_clearing_a_block_keeps_history() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
    }
    assert!(h.service.transfer(transfer(alice, "10.00")).await.is_err());
    assert!(h.service.get_rate_limit_status(alice).await.unwrap().is_blocked);

    assert!(h.service.clear_rate_limit_block(alice).await.unwrap());
    assert!(!h.service.clear_rate_limit_block(alice).await.unwrap());

    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert!(!status.is_blocked);
    assert_eq!(status.reason, None);
    assert_eq!(status.rapid.current, 3);
}

#[tokio::test]
async fn test_limits_are_per_user() {
    let h = Harness::new();
    let (alice, _) = two_users(&h).await;
    let carol = h.open("Carol", "GB0003", "100.00").await;

    for _ in 0..3 {
        h.service.transfer(transfer(alice, "10.00")).await.unwrap();
    }
    assert!(h.service.transfer(transfer(alice, "10.00")).await.is_err());

    h.service.transfer(transfer(carol, "10.00")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_transfers_cannot_bypass_the_limit() {
    let h = Harness::new();
    let (alice, bob) = two_users(&h).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move { service.transfer(transfer(alice, "10.00")).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(BankError::RateLimited(_)) => limited += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(limited, 5);

    let alice_balance = h.balance(alice).await;
    let bob_balance = h.balance(bob).await;
    assert_eq!(alice_balance, dec("9970.00"));
    assert_eq!(bob_balance, dec("30.00"));
    assert_eq!(&alice_balance + &bob_balance, dec("10000.00"));

    let status = h.service.get_rate_limit_status(alice).await.unwrap();
    assert!(status.is_blocked);
    assert_eq!(status.rapid.current, 3);
}

#[tokio::test]
async fn test_unknown_user_has_no_rate_limit_state() {
    let h = Harness::new();
    let stranger = Uuid::new_v4();

    let status = h.service.get_rate_limit_status(stranger).await;
    assert!(matches!(status, Err(BankError::AccountNotFound(id)) if id == stranger));

    let cleared = h.service.clear_rate_limit_block(stranger).await;
    let err = cleared.err().unwrap();
    assert_eq!(err.status_code(), 404);
    assert!(matches!(err, BankError::AccountNotFound(_)));
}
