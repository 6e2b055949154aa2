//! Integration tests for payment and escrow flows against the in-memory ledger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerpay_client::{
    ClientConfig, ClientError, EscrowError, LedgerAccount, LedgerGateway, ManualClock,
    MockGateway, RetryPolicy, TxBuilder,
};
use ledgerpay_crypto::{sign_transaction, KeyStore};
use ledgerpay_ledger_mock::{
    DemoScenario, DEFAULT_BASE_FEE, DEMO_ALICE_BALANCE, DEMO_ALICE_SEQUENCE, DEMO_START_TIME,
};
use ledgerpay_types::{Address, EscrowStatus, Operation, SubmissionOutcome};
use tokio::time::Instant;

struct Fixture {
    alice: Arc<LedgerAccount<MockGateway, ManualClock>>,
    gateway: MockGateway,
    clock: ManualClock,
    bob: Address,
}

fn fixture() -> Fixture {
    let scenario = DemoScenario::new();
    let bob = scenario.bob.address();
    let gateway = MockGateway::new(scenario.ledger);
    let clock = ManualClock::new(DEMO_START_TIME);
    let config = ClientConfig {
        retry_policy: RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 200,
            jitter_ms: 5,
        },
        ..ClientConfig::default()
    };
    let alice = Arc::new(LedgerAccount::new(
        scenario.alice,
        Arc::new(gateway.clone()),
        clock.clone(),
        config,
    ));
    Fixture {
        alice,
        gateway,
        clock,
        bob,
    }
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

fn in_secs(seconds: u32) -> DateTime<Utc> {
    DEMO_START_TIME.saturating_add(seconds).to_datetime()
}

async fn next_sequence(f: &Fixture) -> u32 {
    f.gateway
        .fetch_account_state(&f.alice.address())
        .await
        .unwrap()
        .sequence
}

#[tokio::test(start_paused = true)]
async fn payment_validates_and_advances_sequence() {
    let f = fixture();
    f.gateway.ledger(|ledger| ledger.set_ledger_index(999));

    let result = f
        .alice
        .send_payment(f.bob, 50, deadline())
        .await
        .expect("payment validates");
    assert_eq!(result.outcome, SubmissionOutcome::Validated);
    assert_eq!(result.sequence, Some(DEMO_ALICE_SEQUENCE));
    assert_eq!(result.ledger_index, Some(1000));
    assert_eq!(next_sequence(&f).await, DEMO_ALICE_SEQUENCE + 1);
    assert_eq!(
        f.alice.account_balance().await.unwrap(),
        DEMO_ALICE_BALANCE - 50 - DEFAULT_BASE_FEE
    );

    // The cached next sequence is 11: the following payment uses it without
    // rereading the account.
    let reads = f.gateway.calls().account_state;
    let second = f.alice.send_payment(f.bob, 1, deadline()).await.unwrap();
    assert_eq!(second.sequence, Some(DEMO_ALICE_SEQUENCE + 1));
    assert_eq!(f.gateway.calls().account_state, reads);
}

#[tokio::test(start_paused = true)]
async fn escrow_cancel_waits_for_cancel_after() {
    let f = fixture();
    let receipt = f
        .alice
        .create_escrow(f.bob, 1_000, Some(in_secs(60)), Some(in_secs(3_600)), deadline())
        .await
        .expect("escrow created");
    assert_eq!(receipt.escrow.status, EscrowStatus::Created);
    assert_eq!(receipt.escrow.offer_sequence, DEMO_ALICE_SEQUENCE);
    assert_eq!(receipt.result.sequence, Some(DEMO_ALICE_SEQUENCE));

    let owner = f.alice.address();
    let err = f
        .alice
        .cancel_escrow(owner, receipt.escrow.offer_sequence, deadline())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Escrow(EscrowError::NotYetCancellable { .. })
    ));

    f.clock.advance(3_601);
    f.gateway.ledger(|ledger| ledger.advance_time(3_601));
    let result = f
        .alice
        .cancel_escrow(owner, receipt.escrow.offer_sequence, deadline())
        .await
        .expect("cancel validates");
    assert!(result.is_validated());
    assert_eq!(
        f.alice
            .tracked_escrow(owner, receipt.escrow.offer_sequence)
            .unwrap()
            .status,
        EscrowStatus::Cancelled
    );
    assert!(f.alice.escrows_of(owner).await.unwrap().is_empty());
    assert_eq!(
        f.alice.account_balance().await.unwrap(),
        DEMO_ALICE_BALANCE - 2 * DEFAULT_BASE_FEE
    );
}

#[tokio::test(start_paused = true)]
async fn finish_before_finish_after_makes_no_network_calls() {
    let f = fixture();
    let receipt = f
        .alice
        .create_escrow(f.bob, 1_000, Some(in_secs(60)), None, deadline())
        .await
        .unwrap();
    let before = f.gateway.calls();

    for offset in [0, 30, 60] {
        f.clock.set(DEMO_START_TIME.saturating_add(offset));
        let err = f
            .alice
            .finish_escrow(f.alice.address(), receipt.escrow.offer_sequence, deadline())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Escrow(EscrowError::NotYetFinishable { .. })
        ));
    }
    assert_eq!(f.gateway.calls().total(), before.total());
}

#[tokio::test(start_paused = true)]
async fn network_error_then_success_advances_sequence_once() {
    let f = fixture();
    f.gateway.fail_next_submits(1, false);

    let result = f.alice.send_payment(f.bob, 50, deadline()).await.unwrap();
    assert!(result.is_validated());

    let submitted = f.gateway.submitted_hashes();
    assert_eq!(submitted, vec![result.hash, result.hash]);
    assert_eq!(next_sequence(&f).await, DEMO_ALICE_SEQUENCE + 1);
}

#[tokio::test(start_paused = true)]
async fn insufficient_balance_is_rejected_without_consuming_sequence() {
    let f = fixture();
    let err = f
        .alice
        .send_payment(f.bob, DEMO_ALICE_BALANCE * 2, deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransactionRejected { .. }));
    assert_eq!(err.rejection_code(), Some("tecUNFUNDED_PAYMENT"));
    assert_eq!(next_sequence(&f).await, DEMO_ALICE_SEQUENCE);

    let retry = f.alice.send_payment(f.bob, 10, deadline()).await.unwrap();
    assert_eq!(retry.sequence, Some(DEMO_ALICE_SEQUENCE));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_use_distinct_sequences() {
    let f = fixture();
    let handles: Vec<_> = (0..12u64)
        .map(|i| {
            let alice = Arc::clone(&f.alice);
            let bob = f.bob;
            tokio::spawn(async move {
                alice
                    .send_payment(bob, 10 + i, Instant::now() + Duration::from_secs(30))
                    .await
            })
        })
        .collect();

    let mut sequences = HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap().expect("payment validates");
        assert!(result.is_validated());
        assert!(sequences.insert(result.sequence.unwrap()));
    }
    let expected: HashSet<u32> = (DEMO_ALICE_SEQUENCE..DEMO_ALICE_SEQUENCE + 12).collect();
    assert_eq!(sequences, expected);
    assert_eq!(next_sequence(&f).await, DEMO_ALICE_SEQUENCE + 12);
}

#[test]
fn signing_is_deterministic() {
    let keys = KeyStore::from_seed("0x1111111111111111111111111111111111111111111111111111111111111111")
        .expect("valid seed");
    let unsigned = TxBuilder::new(0)
        .with_account(keys.address())
        .with_sequence(DEMO_ALICE_SEQUENCE)
        .with_fee(DEFAULT_BASE_FEE)
        .with_payment(Address::new([0x02; 20]), 50)
        .build()
        .unwrap();
    let first = sign_transaction(unsigned.clone(), keys.keypair()).unwrap();
    let second = sign_transaction(unsigned, keys.keypair()).unwrap();
    assert_eq!(first.signature(), second.signature());
    assert_eq!(first.hash(), second.hash());
    assert_eq!(first.blob(), second.blob());
}

#[test]
fn escrow_window_translation_preserves_order() {
    let keys = KeyStore::from_seed_bytes(&[0x11; 32]);
    for (finish, cancel) in [(1, 2), (60, 3_600), (0, 86_400 * 365)] {
        let tx = TxBuilder::new(0)
            .with_account(keys.address())
            .with_sequence(1)
            .with_fee(10)
            .with_escrow_create(
                Address::new([0x02; 20]),
                5,
                Some(in_secs(finish)),
                Some(in_secs(cancel)),
            )
            .build()
            .unwrap();
        let Operation::EscrowCreate {
            finish_after: Some(finish_after),
            cancel_after: Some(cancel_after),
            ..
        } = tx.operation
        else {
            panic!("expected both escrow times");
        };
        assert!(finish_after < cancel_after);
    }
}
