use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, FixedBytes};
use alloy::signers::local::PrivateKeySigner;

use x402::{
    ConfirmationSource, ConfirmationStatus, InMemorySettlementStore, PaymentSigner,
    PaymentVerifier, PublisherConfig, RejectReason, RequirementsPublisher, SchemeConfig,
    SchemeRegistry, SettlementRecord, SettlementStatus, SettlementTracker, VerificationResult,
    X402Error,
};

/// Confirmation source that answers `Unknown` until `confirm_after` checks.
struct ScriptedSource {
    checks: AtomicUsize,
    confirm_after: Option<usize>,
}

impl ScriptedSource {
    fn never() -> Self {
        Self {
            checks: AtomicUsize::new(0),
            confirm_after: None,
        }
    }

    fn after(checks: usize) -> Self {
        Self {
            checks: AtomicUsize::new(0),
            confirm_after: Some(checks),
        }
    }
}

impl ConfirmationSource for ScriptedSource {
    async fn check(&self, _record: &SettlementRecord) -> Result<ConfirmationStatus, X402Error> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        match self.confirm_after {
            Some(after) if n >= after => Ok(ConfirmationStatus::Confirmed {
                transaction: Some("0xconfirmed".to_string()),
            }),
            _ => Ok(ConfirmationStatus::Unknown),
        }
    }
}

fn onchain_gateway(timeout_secs: u64) -> (x402::PaymentRequirementsDocument, PaymentVerifier) {
    let schemes =
        SchemeRegistry::new(vec![SchemeConfig::exact_onchain("eip155:42431", 42431)]).unwrap();
    let config = PublisherConfig::new(Address::repeat_byte(0x42))
        .with_max_timeout_seconds(timeout_secs)
        .with_price("/api/intel", "100000", None)
        .unwrap();
    let doc = RequirementsPublisher::new(config, schemes.clone())
        .build_requirements("/api/intel")
        .unwrap();
    let tracker = SettlementTracker::new(Arc::new(InMemorySettlementStore::new()));
    (doc, PaymentVerifier::new(schemes, tracker))
}

async fn wait_for_terminal(tracker: &SettlementTracker, id: &str) -> SettlementRecord {
    for _ in 0..100 {
        let record = tracker.lookup(id).unwrap().unwrap();
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("settlement {id} never left pending");
}

#[tokio::test]
async fn test_pending_settlement_times_out() {
    let (doc, verifier) = onchain_gateway(1);
    let source = Arc::new(ScriptedSource::never());
    verifier
        .tracker()
        .start_confirmation_worker(Arc::clone(&source), Duration::from_millis(100))
        .unwrap();

    let proof = PaymentSigner::new(PrivateKeySigner::random())
        .create_onchain_proof(&doc.accepts[0], FixedBytes::new([0xee; 32]))
        .unwrap();

    let VerificationResult::Pending { settlement_id, .. } = verifier.verify(&proof, &doc).unwrap()
    else {
        panic!("expected pending");
    };

    let record = wait_for_terminal(verifier.tracker(), &settlement_id).await;
    assert_eq!(record.status, SettlementStatus::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some("confirmation timed out"));
    assert!(source.checks.load(Ordering::SeqCst) >= 1);

    // Terminal: a late confirmation changes nothing.
    let late = verifier
        .tracker()
        .confirm(
            &settlement_id,
            x402::ConfirmationOutcome::Confirmed { transaction: None },
        )
        .unwrap();
    assert_eq!(late, x402::ConfirmOutcome::AlreadyTerminal);
    assert_eq!(
        verifier
            .tracker()
            .poll(&settlement_id)
            .unwrap()
            .unwrap()
            .status,
        SettlementStatus::Failed
    );
}

#[tokio::test]
async fn test_pending_settlement_confirms_and_redeems_once() {
    let (doc, verifier) = onchain_gateway(30);
    verifier
        .tracker()
        .start_confirmation_worker(Arc::new(ScriptedSource::after(2)), Duration::from_millis(50))
        .unwrap();

    let proof = PaymentSigner::new(PrivateKeySigner::random())
        .create_onchain_proof(&doc.accepts[0], FixedBytes::new([0xcd; 32]))
        .unwrap();

    let VerificationResult::Pending { settlement_id, .. } = verifier.verify(&proof, &doc).unwrap()
    else {
        panic!("expected pending");
    };

    let record = wait_for_terminal(verifier.tracker(), &settlement_id).await;
    assert_eq!(record.status, SettlementStatus::Confirmed);
    assert_eq!(record.transaction.as_deref(), Some("0xconfirmed"));
    assert!(!record.redeemed);

    assert!(matches!(
        verifier.verify(&proof, &doc).unwrap(),
        VerificationResult::Accepted { .. }
    ));
    assert!(matches!(
        verifier.verify(&proof, &doc).unwrap(),
        VerificationResult::Rejected {
            reason: RejectReason::Replayed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_worker_starts_once() {
    let (_, verifier) = onchain_gateway(30);
    let tracker = verifier.tracker();
    assert!(tracker
        .start_confirmation_worker(Arc::new(ScriptedSource::never()), Duration::from_secs(1))
        .is_ok());
    assert!(tracker
        .start_confirmation_worker(Arc::new(ScriptedSource::never()), Duration::from_secs(1))
        .is_err());
}

#[tokio::test]
async fn test_sweeper_fails_overdue_without_worker() {
    let (doc, verifier) = onchain_gateway(1);
    let proof = PaymentSigner::new(PrivateKeySigner::random())
        .create_onchain_proof(&doc.accepts[0], FixedBytes::new([0xab; 32]))
        .unwrap();
    let VerificationResult::Pending { settlement_id, .. } = verifier.verify(&proof, &doc).unwrap()
    else {
        panic!("expected pending");
    };

    let sweeper = verifier
        .tracker()
        .start_expiry_sweeper(Duration::from_millis(100), 3600);
    let record = wait_for_terminal(verifier.tracker(), &settlement_id).await;
    sweeper.abort();

    assert_eq!(record.status, SettlementStatus::Failed);
}

#[test]
fn test_late_confirmation_still_redeems() {
    const NOW: u64 = 1_700_000_000;
    let (doc, verifier) = onchain_gateway(300);
    let proof = PaymentSigner::new(PrivateKeySigner::random())
        .sign(
            &doc.accepts[0],
            alloy::primitives::U256::from(100_000u64),
            FixedBytes::new([0x31; 32]),
            NOW,
        )
        .unwrap();

    let VerificationResult::Pending { settlement_id, .. } =
        verifier.verify_at(&proof, &doc, NOW + 20).unwrap()
    else {
        panic!("expected pending");
    };

    // Lands after the signing window, before the record's deadline.
    let applied = verifier
        .tracker()
        .confirm_at(
            &settlement_id,
            x402::ConfirmationOutcome::Confirmed {
                transaction: Some("0xlate".to_string()),
            },
            NOW + 310,
        )
        .unwrap();
    assert_eq!(applied, x402::ConfirmOutcome::Applied);

    assert!(matches!(
        verifier.verify_at(&proof, &doc, NOW + 312).unwrap(),
        VerificationResult::Accepted { settlement_id: id, .. } if id == settlement_id
    ));
    assert!(matches!(
        verifier.verify_at(&proof, &doc, NOW + 313).unwrap(),
        VerificationResult::Rejected {
            reason: RejectReason::Replayed,
            ..
        }
    ));

    // A proof first seen outside its window is still stale.
    let stale = PaymentSigner::new(PrivateKeySigner::random())
        .sign(
            &doc.accepts[0],
            alloy::primitives::U256::from(100_000u64),
            FixedBytes::new([0x32; 32]),
            NOW,
        )
        .unwrap();
    assert!(matches!(
        verifier.verify_at(&stale, &doc, NOW + 312).unwrap(),
        VerificationResult::Rejected {
            reason: RejectReason::Expired,
            ..
        }
    ));
}

#[test]
fn test_one_transfer_cited_by_two_payers_grants_once() {
    let (doc, verifier) = onchain_gateway(30);
    let tx_hash = FixedBytes::new([0x77; 32]);
    let first = PaymentSigner::new(PrivateKeySigner::random())
        .create_onchain_proof(&doc.accepts[0], tx_hash)
        .unwrap();
    let second = PaymentSigner::new(PrivateKeySigner::random())
        .create_onchain_proof(&doc.accepts[0], tx_hash)
        .unwrap();

    let VerificationResult::Pending { settlement_id, .. } = verifier.verify(&first, &doc).unwrap()
    else {
        panic!("expected pending");
    };
    assert!(matches!(
        verifier.verify(&second, &doc).unwrap(),
        VerificationResult::Rejected {
            reason: RejectReason::Replayed,
            ..
        }
    ));

    verifier
        .tracker()
        .confirm(
            &settlement_id,
            x402::ConfirmationOutcome::Confirmed {
                transaction: Some("0x77".to_string()),
            },
        )
        .unwrap();

    // The other key cannot redeem the confirmed transfer either.
    assert!(matches!(
        verifier.verify(&second, &doc).unwrap(),
        VerificationResult::Rejected {
            reason: RejectReason::Replayed,
            ..
        }
    ));
    let record = verifier.tracker().lookup(&settlement_id).unwrap().unwrap();
    assert!(!record.redeemed);
    assert_eq!(record.payer, first.payload.from);

    assert!(matches!(
        verifier.verify(&first, &doc).unwrap(),
        VerificationResult::Accepted { payer, .. } if payer == first.payload.from
    ));
}
