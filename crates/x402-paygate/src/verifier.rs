//! Inbound proof verification.
//!
//! Checks run cheapest-first and stop at the first failure:
//!
//! 1. scheme and network are published and registered
//! 2. claimed amount covers the required amount
//! 3. the EIP-712 signature recovers to the claimed payer
//! 4. an existing settlement for the signed reference is resolved for the
//!    payer that created it
//! 5. otherwise the signed timestamp is within the freshness window
//! 6. and the settlement id is claimed atomically in the tracker
//!
//! Nothing a client sends can produce an `Err`: undecodable or unparsable
//! input is [`RejectReason::Malformed`]. `Err` is reserved for store failures
//! and static misconfiguration, and never grants access.

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::eip712::{decode_signature_hex, settlement_id, verify_signature};
use crate::scheme::{SchemeRegistry, SettlementMode};
use crate::store::InsertOutcome;
use crate::time::unix_now;
use crate::tracker::{ConfirmationOutcome, SettlementRecord, SettlementStatus, SettlementTracker};
use crate::{
    PaymentAuthorization, PaymentProof, PaymentRequirementsDocument, X402Error,
    MAX_CLOCK_SKEW_SECONDS, X402_VERSION,
};

/// Why a proof was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnsupportedScheme,
    InsufficientAmount,
    InvalidSignature,
    Expired,
    Replayed,
    #[serde(rename = "malformed_payment")]
    Malformed,
}

impl RejectReason {
    /// Machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::UnsupportedScheme => "unsupported_scheme",
            RejectReason::InsufficientAmount => "insufficient_amount",
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::Expired => "expired",
            RejectReason::Replayed => "replayed",
            RejectReason::Malformed => "malformed_payment",
        }
    }

    /// HTTP status the gateway answers with: 403 for a forged proof,
    /// 402 for everything the payer can fix by paying again.
    pub fn http_status(&self) -> u16 {
        match self {
            RejectReason::InvalidSignature => 403,
            _ => 402,
        }
    }

    /// Rejections that indicate tampering or reuse rather than a stale or
    /// short payment. Logged at warn.
    pub fn is_suspicious(&self) -> bool {
        matches!(self, RejectReason::InvalidSignature | RejectReason::Replayed)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// Access granted. Returned at most once per settlement id.
    Accepted {
        settlement_id: String,
        payer: Address,
    },
    Rejected {
        reason: RejectReason,
        detail: String,
    },
    /// Recorded, awaiting on-chain confirmation. Re-present the same proof
    /// after `retry_after` seconds.
    Pending {
        settlement_id: String,
        retry_after: u64,
    },
}

impl VerificationResult {
    fn reject(reason: RejectReason, detail: impl Into<String>) -> Self {
        VerificationResult::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            VerificationResult::Accepted { .. } => "accepted",
            VerificationResult::Pending { .. } => "pending",
            VerificationResult::Rejected { reason, .. } => reason.code(),
        }
    }
}

/// Verifies proofs against published requirements and claims settlements.
#[derive(Debug, Clone)]
pub struct PaymentVerifier {
    schemes: SchemeRegistry,
    tracker: SettlementTracker,
    max_clock_skew: u64,
}

impl PaymentVerifier {
    pub fn new(schemes: SchemeRegistry, tracker: SettlementTracker) -> Self {
        Self {
            schemes,
            tracker,
            max_clock_skew: MAX_CLOCK_SKEW_SECONDS,
        }
    }

    pub fn with_max_clock_skew(mut self, seconds: u64) -> Self {
        self.max_clock_skew = seconds;
        self
    }

    pub fn tracker(&self) -> &SettlementTracker {
        &self.tracker
    }

    /// Decode an `X-Payment` header value and verify it.
    pub fn verify_header(
        &self,
        header_value: &str,
        requirements: &PaymentRequirementsDocument,
    ) -> Result<(Option<PaymentProof>, VerificationResult), X402Error> {
        match PaymentProof::decode_header(header_value) {
            Ok(proof) => {
                let result = self.verify(&proof, requirements)?;
                Ok((Some(proof), result))
            }
            Err(e) => Ok((
                None,
                VerificationResult::reject(RejectReason::Malformed, e.to_string()),
            )),
        }
    }

    pub fn verify(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirementsDocument,
    ) -> Result<VerificationResult, X402Error> {
        self.verify_at(proof, requirements, unix_now())
    }

    /// [`verify`](Self::verify) against an explicit clock.
    pub fn verify_at(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirementsDocument,
        now: u64,
    ) -> Result<VerificationResult, X402Error> {
        let result = self.check(proof, requirements, now)?;
        match &result {
            VerificationResult::Rejected { reason, detail } if reason.is_suspicious() => {
                tracing::warn!(
                    payer = %proof.payload.from,
                    reason = %reason,
                    detail = %detail,
                    "payment rejected"
                );
            }
            VerificationResult::Rejected { reason, detail } => {
                tracing::info!(
                    payer = %proof.payload.from,
                    reason = %reason,
                    detail = %detail,
                    "payment rejected"
                );
            }
            VerificationResult::Accepted { settlement_id, .. } => {
                tracing::info!(
                    payer = %proof.payload.from,
                    settlement_id = %settlement_id,
                    "payment accepted"
                );
            }
            VerificationResult::Pending { settlement_id, .. } => {
                tracing::debug!(
                    payer = %proof.payload.from,
                    settlement_id = %settlement_id,
                    "payment pending confirmation"
                );
            }
        }
        Ok(result)
    }

    fn check(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirementsDocument,
        now: u64,
    ) -> Result<VerificationResult, X402Error> {
        use RejectReason::*;

        if proof.x402_version != X402_VERSION {
            return Ok(VerificationResult::reject(
                UnsupportedScheme,
                format!("unsupported x402 version {}", proof.x402_version),
            ));
        }

        // 1. Scheme and network
        let (Some(requirement), Some(scheme)) = (
            requirements.find(&proof.scheme, &proof.network),
            self.schemes.find(&proof.scheme, &proof.network),
        ) else {
            return Ok(VerificationResult::reject(
                UnsupportedScheme,
                format!("'{}' on '{}' is not accepted", proof.scheme, proof.network),
            ));
        };

        // 2. Amount
        let claimed = match proof.claimed_amount() {
            Ok(v) => v,
            Err(e) => return Ok(VerificationResult::reject(Malformed, e.to_string())),
        };
        let required = requirement.required_amount()?;
        if claimed < required {
            return Ok(VerificationResult::reject(
                InsufficientAmount,
                format!("claimed {claimed}, required {required}"),
            ));
        }

        // 3. Signature, over the requirement's recipient, asset and resource
        let signature = match decode_signature_hex(&proof.payload.signature) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(VerificationResult::reject(Malformed, e.to_string())),
        };
        let auth = PaymentAuthorization {
            from: proof.payload.from,
            to: requirement.pay_to,
            value: claimed,
            asset: requirement.asset,
            resource: requirement.resource.clone(),
            nonce: proof.payload.reference,
            timestamp: U256::from(proof.payload.timestamp),
        };
        match verify_signature(&auth, &signature, scheme) {
            Ok(signer) if signer == proof.payload.from => {}
            Ok(signer) => {
                return Ok(VerificationResult::reject(
                    InvalidSignature,
                    format!("signed by {signer}, claims {}", proof.payload.from),
                ))
            }
            Err(e) => return Ok(VerificationResult::reject(InvalidSignature, e.to_string())),
        }

        // 4. Settlement id, derived only from signed fields. An on-chain
        // transfer settles once whichever key cites it.
        let bound_payer = (!scheme.requires_confirmation()).then_some(proof.payload.from);
        let id = settlement_id(&proof.network, bound_payer, &proof.payload.reference);

        // 5. Existing settlement. Freshness was enforced when it was created,
        // so a confirmation landing after the signing window still redeems.
        if let Some(existing) = self.tracker.lookup(&id)? {
            return self.resolve_existing(
                existing,
                proof,
                &requirement.resource,
                scheme.retry_after_seconds,
                now,
            );
        }

        // 6. Freshness
        let issued = proof.payload.timestamp;
        if issued > now.saturating_add(self.max_clock_skew) {
            return Ok(VerificationResult::reject(
                Expired,
                format!("issued {} seconds in the future", issued - now),
            ));
        }
        if now.saturating_sub(issued) > requirement.max_timeout_seconds {
            return Ok(VerificationResult::reject(
                Expired,
                format!(
                    "issued {} seconds ago, window is {}",
                    now - issued,
                    requirement.max_timeout_seconds
                ),
            ));
        }

        // 7. Claim
        let immediate = scheme.settlement == SettlementMode::Immediate;
        let record = SettlementRecord {
            settlement_id: id.clone(),
            resource: requirement.resource.clone(),
            amount: claimed.to_string(),
            recipient: requirement.pay_to,
            payer: proof.payload.from,
            network: proof.network.clone(),
            scheme: proof.scheme.clone(),
            reference: proof.payload.reference,
            status: if immediate {
                SettlementStatus::Confirmed
            } else {
                SettlementStatus::Pending
            },
            redeemed: immediate,
            created_at: now,
            updated_at: now,
            expires_at: now.saturating_add(requirement.max_timeout_seconds),
            transaction: None,
            failure_reason: None,
        };

        match self.tracker.record(record)? {
            InsertOutcome::Inserted if immediate => Ok(VerificationResult::Accepted {
                settlement_id: id,
                payer: proof.payload.from,
            }),
            InsertOutcome::Inserted => {
                self.tracker.enqueue(&id);
                Ok(VerificationResult::Pending {
                    settlement_id: id,
                    retry_after: scheme.retry_after_seconds,
                })
            }
            // Lost the race to a concurrent request with the same proof.
            InsertOutcome::Exists(existing) => self.resolve_existing(
                existing,
                proof,
                &requirement.resource,
                scheme.retry_after_seconds,
                now,
            ),
        }
    }

    fn resolve_existing(
        &self,
        existing: SettlementRecord,
        proof: &PaymentProof,
        resource: &str,
        retry_after: u64,
        now: u64,
    ) -> Result<VerificationResult, X402Error> {
        let id = existing.settlement_id;
        if existing.payer != proof.payload.from || existing.resource != resource {
            return Ok(VerificationResult::reject(
                RejectReason::Replayed,
                format!("reference already claimed by settlement {id}"),
            ));
        }
        match existing.status {
            SettlementStatus::Failed => Ok(VerificationResult::reject(
                RejectReason::Expired,
                existing
                    .failure_reason
                    .unwrap_or_else(|| "settlement failed".to_string()),
            )),
            SettlementStatus::Confirmed => {
                if self.tracker.redeem(&id)? {
                    Ok(VerificationResult::Accepted {
                        settlement_id: id,
                        payer: existing.payer,
                    })
                } else {
                    Ok(VerificationResult::reject(
                        RejectReason::Replayed,
                        format!("settlement {id} already used"),
                    ))
                }
            }
            SettlementStatus::Pending if existing.expires_at <= now => {
                self.tracker
                    .confirm_at(&id, ConfirmationOutcome::TimedOut, now)?;
                Ok(VerificationResult::reject(
                    RejectReason::Expired,
                    "confirmation timed out",
                ))
            }
            SettlementStatus::Pending => Ok(VerificationResult::Pending {
                settlement_id: id,
                retry_after,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{PublisherConfig, RequirementsPublisher};
    use crate::scheme::SchemeConfig;
    use crate::signer::PaymentSigner;
    use crate::store::InMemorySettlementStore;
    use alloy::primitives::FixedBytes;
    use alloy::signers::local::PrivateKeySigner;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000;

    fn setup(schemes: SchemeRegistry) -> (PaymentVerifier, PaymentRequirementsDocument) {
        let config = PublisherConfig::new(Address::repeat_byte(0x42))
            .with_price("/api/intel", "100000", None)
            .unwrap();
        let doc = RequirementsPublisher::new(config, schemes.clone())
            .build_requirements("/api/intel")
            .unwrap();
        let tracker = SettlementTracker::new(Arc::new(InMemorySettlementStore::new()));
        (PaymentVerifier::new(schemes, tracker), doc)
    }

    fn sign(doc: &PaymentRequirementsDocument, value: u64, ts: u64) -> PaymentProof {
        PaymentSigner::new(PrivateKeySigner::random())
            .sign(
                &doc.accepts[0],
                U256::from(value),
                FixedBytes::new([0x5a; 32]),
                ts,
            )
            .unwrap()
    }

    fn reason(result: VerificationResult) -> RejectReason {
        match result {
            VerificationResult::Rejected { reason, .. } => reason,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_then_replay() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let proof = sign(&doc, 100_000, NOW);

        assert!(matches!(
            verifier.verify_at(&proof, &doc, NOW).unwrap(),
            VerificationResult::Accepted { payer, .. } if payer == proof.payload.from
        ));
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW + 1).unwrap()),
            RejectReason::Replayed
        );
    }

    #[test]
    fn test_overpayment_accepted() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let proof = sign(&doc, 250_000, NOW);
        assert!(matches!(
            verifier.verify_at(&proof, &doc, NOW).unwrap(),
            VerificationResult::Accepted { .. }
        ));
    }

    #[test]
    fn test_underpayment_rejected() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let proof = sign(&doc, 50_000, NOW);
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW).unwrap()),
            RejectReason::InsufficientAmount
        );
    }

    #[test]
    fn test_tampered_amount_breaks_signature() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let mut proof = sign(&doc, 100_000, NOW);
        proof.payload.value = "200000".to_string();
        let result = verifier.verify_at(&proof, &doc, NOW).unwrap();
        assert_eq!(reason(result), RejectReason::InvalidSignature);
        assert_eq!(RejectReason::InvalidSignature.http_status(), 403);
    }

    #[test]
    fn test_stale_and_future_proofs_expire() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let stale = sign(&doc, 100_000, NOW - 301);
        assert_eq!(
            reason(verifier.verify_at(&stale, &doc, NOW).unwrap()),
            RejectReason::Expired
        );
        let future = sign(&doc, 100_000, NOW + 61);
        assert_eq!(
            reason(verifier.verify_at(&future, &doc, NOW).unwrap()),
            RejectReason::Expired
        );
        let edge = sign(&doc, 100_000, NOW - 300);
        assert!(matches!(
            verifier.verify_at(&edge, &doc, NOW).unwrap(),
            VerificationResult::Accepted { .. }
        ));
    }

    #[test]
    fn test_unknown_scheme_or_network() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let mut proof = sign(&doc, 100_000, NOW);
        proof.network = "eip155:1".to_string();
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW).unwrap()),
            RejectReason::UnsupportedScheme
        );
        proof.network = doc.accepts[0].network.clone();
        proof.scheme = "upto".to_string();
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW).unwrap()),
            RejectReason::UnsupportedScheme
        );
    }

    #[test]
    fn test_malformed_header_is_rejection() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let (proof, result) = verifier.verify_header("%%%not-base64%%%", &doc).unwrap();
        assert!(proof.is_none());
        assert_eq!(reason(result), RejectReason::Malformed);

        let (_, result) = verifier.verify_header("bm90IGpzb24=", &doc).unwrap();
        assert_eq!(reason(result), RejectReason::Malformed);
    }

    #[test]
    fn test_unparsable_fields_are_malformed() {
        let (verifier, doc) = setup(SchemeRegistry::default());
        let mut proof = sign(&doc, 100_000, NOW);
        proof.payload.value = "lots".to_string();
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW).unwrap()),
            RejectReason::Malformed
        );

        let mut proof = sign(&doc, 100_000, NOW);
        proof.payload.signature = "0xzz".to_string();
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW).unwrap()),
            RejectReason::Malformed
        );
    }

    #[test]
    fn test_onchain_pending_then_confirmed_then_replayed() {
        let schemes =
            SchemeRegistry::new(vec![SchemeConfig::exact_onchain("eip155:42431", 42431)]).unwrap();
        let (verifier, doc) = setup(schemes);
        let proof = sign(&doc, 100_000, NOW);

        let VerificationResult::Pending {
            settlement_id,
            retry_after,
        } = verifier.verify_at(&proof, &doc, NOW).unwrap()
        else {
            panic!("expected pending");
        };
        assert_eq!(retry_after, crate::DEFAULT_RETRY_AFTER_SECONDS);

        // Re-presenting before confirmation stays pending.
        assert!(matches!(
            verifier.verify_at(&proof, &doc, NOW + 5).unwrap(),
            VerificationResult::Pending { .. }
        ));

        verifier
            .tracker()
            .confirm(
                &settlement_id,
                ConfirmationOutcome::Confirmed {
                    transaction: Some("0xfeed".to_string()),
                },
            )
            .unwrap();

        assert!(matches!(
            verifier.verify_at(&proof, &doc, NOW + 10).unwrap(),
            VerificationResult::Accepted { .. }
        ));
        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW + 11).unwrap()),
            RejectReason::Replayed
        );
    }

    #[test]
    fn test_failed_settlement_rejects_as_expired() {
        let schemes =
            SchemeRegistry::new(vec![SchemeConfig::exact_onchain("eip155:42431", 42431)]).unwrap();
        let (verifier, doc) = setup(schemes);
        let proof = sign(&doc, 100_000, NOW);

        let VerificationResult::Pending { settlement_id, .. } =
            verifier.verify_at(&proof, &doc, NOW).unwrap()
        else {
            panic!("expected pending");
        };
        verifier
            .tracker()
            .confirm(
                &settlement_id,
                ConfirmationOutcome::Rejected {
                    reason: "transfer reverted".to_string(),
                },
            )
            .unwrap();

        assert_eq!(
            reason(verifier.verify_at(&proof, &doc, NOW + 5).unwrap()),
            RejectReason::Expired
        );
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RejectReason::Malformed.code(), "malformed_payment");
        assert_eq!(
            serde_json::to_value(RejectReason::Malformed).unwrap(),
            "malformed_payment"
        );
        assert_eq!(
            serde_json::to_value(RejectReason::InsufficientAmount).unwrap(),
            "insufficient_amount"
        );
        assert_eq!(RejectReason::Expired.http_status(), 402);
    }
}
