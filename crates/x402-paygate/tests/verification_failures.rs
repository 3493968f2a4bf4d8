use std::sync::Arc;

use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::local::PrivateKeySigner;

use x402::{
    InMemorySettlementStore, PaymentProof, PaymentRequirementsDocument, PaymentSigner,
    PaymentVerifier, PublisherConfig, RejectReason, RequirementsPublisher, SchemeRegistry,
    SettlementStatus, SettlementTracker, VerificationResult,
};

fn gateway() -> (RequirementsPublisher, PaymentVerifier) {
    let schemes = SchemeRegistry::default();
    let config = PublisherConfig::new(Address::repeat_byte(0x42))
        .with_price("/api/intel", "100000", Some("YUREI Token Intelligence"))
        .unwrap()
        .with_price("/api/other", "100000", None)
        .unwrap();
    let tracker = SettlementTracker::new(Arc::new(InMemorySettlementStore::new()));
    (
        RequirementsPublisher::new(config, schemes.clone()),
        PaymentVerifier::new(schemes, tracker),
    )
}

fn rejection(result: VerificationResult) -> RejectReason {
    match result {
        VerificationResult::Rejected { reason, .. } => reason,
        other => panic!("expected rejection, got {other:?}"),
    }
}

fn exact_proof(doc: &PaymentRequirementsDocument, value: u64) -> PaymentProof {
    PaymentSigner::new(PrivateKeySigner::random())
        .sign(
            &doc.accepts[0],
            U256::from(value),
            FixedBytes::new([0x77; 32]),
            x402::time::unix_now(),
        )
        .unwrap()
}

#[test]
fn test_exact_payment_accepted_then_replayed() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let proof = exact_proof(&doc, 100_000);

    let settlement_id = match verifier.verify(&proof, &doc).unwrap() {
        VerificationResult::Accepted { settlement_id, .. } => settlement_id,
        other => panic!("expected acceptance, got {other:?}"),
    };

    let record = verifier.tracker().lookup(&settlement_id).unwrap().unwrap();
    assert_eq!(record.status, SettlementStatus::Confirmed);
    assert!(record.redeemed);
    assert_eq!(record.amount, "100000");
    assert_eq!(record.payer, proof.payload.from);

    assert_eq!(
        rejection(verifier.verify(&proof, &doc).unwrap()),
        RejectReason::Replayed
    );
}

#[test]
fn test_underpayment_records_nothing() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let proof = exact_proof(&doc, 50_000);

    assert_eq!(
        rejection(verifier.verify(&proof, &doc).unwrap()),
        RejectReason::InsufficientAmount
    );

    let id = x402::eip712::settlement_id(
        &proof.network,
        Some(proof.payload.from),
        &proof.payload.reference,
    );
    assert!(verifier.tracker().lookup(&id).unwrap().is_none());
}

#[test]
fn test_proof_for_other_resource_fails_signature() {
    let (publisher, verifier) = gateway();
    let other = publisher.build_requirements("/api/other").unwrap();
    let intel = publisher.build_requirements("/api/intel").unwrap();
    let proof = exact_proof(&other, 100_000);

    assert_eq!(
        rejection(verifier.verify(&proof, &intel).unwrap()),
        RejectReason::InvalidSignature
    );
}

#[test]
fn test_proof_paying_someone_else_fails_signature() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let mut redirected = doc.clone();
    redirected.accepts[0].pay_to = Address::repeat_byte(0x66);
    let proof = exact_proof(&redirected, 100_000);

    assert_eq!(
        rejection(verifier.verify(&proof, &doc).unwrap()),
        RejectReason::InvalidSignature
    );
}

#[test]
fn test_claimed_payer_must_be_signer() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let mut proof = exact_proof(&doc, 100_000);
    proof.payload.from = PrivateKeySigner::random().address();

    assert_eq!(
        rejection(verifier.verify(&proof, &doc).unwrap()),
        RejectReason::InvalidSignature
    );
}

#[test]
fn test_header_roundtrip_through_verifier() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let header = exact_proof(&doc, 100_000).encode_header().unwrap();

    let (proof, result) = verifier.verify_header(&header, &doc).unwrap();
    assert!(proof.is_some());
    assert!(matches!(result, VerificationResult::Accepted { .. }));
}

#[test]
fn test_oversized_header_is_malformed() {
    let (publisher, verifier) = gateway();
    let doc = publisher.build_requirements("/api/intel").unwrap();
    let header = "A".repeat(x402::payment::MAX_PAYMENT_HEADER_LEN + 4);

    let (_, result) = verifier.verify_header(&header, &doc).unwrap();
    assert_eq!(rejection(result), RejectReason::Malformed);
}
