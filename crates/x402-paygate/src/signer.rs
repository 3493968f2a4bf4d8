use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::eip712::{encode_signature_hex, random_nonce, signing_hash};
use crate::scheme::SchemeConfig;
use crate::{PaymentAuthorization, PaymentProof, PaymentRequirement, ProofPayload, X402Error};

/// Payer-side signer: turns a published requirement into a signed proof.
///
/// Holds the key; never sees the gateway's settlement state.
pub struct PaymentSigner {
    signer: PrivateKeySigner,
}

impl PaymentSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign the exact required amount with a fresh random reference.
    pub fn create_proof(&self, requirement: &PaymentRequirement) -> Result<PaymentProof, X402Error> {
        let value = requirement.required_amount()?;
        self.sign(requirement, value, random_nonce(), crate::time::unix_now())
    }

    /// Sign a proof for an `exact-onchain` transfer already broadcast as `tx_hash`.
    pub fn create_onchain_proof(
        &self,
        requirement: &PaymentRequirement,
        tx_hash: FixedBytes<32>,
    ) -> Result<PaymentProof, X402Error> {
        let value = requirement.required_amount()?;
        self.sign(requirement, value, tx_hash, crate::time::unix_now())
    }

    /// Sign an arbitrary value, reference and issue time against `requirement`.
    pub fn sign(
        &self,
        requirement: &PaymentRequirement,
        value: U256,
        reference: FixedBytes<32>,
        timestamp: u64,
    ) -> Result<PaymentProof, X402Error> {
        let scheme = SchemeConfig::for_network(&requirement.scheme, &requirement.network)?;

        let auth = PaymentAuthorization {
            from: self.signer.address(),
            to: requirement.pay_to,
            value,
            asset: requirement.asset,
            resource: requirement.resource.clone(),
            nonce: reference,
            timestamp: U256::from(timestamp),
        };

        let sig = self
            .signer
            .sign_hash_sync(&signing_hash(&auth, &scheme))
            .map_err(|e| X402Error::SignatureError(format!("signing failed: {e}")))?;

        Ok(PaymentProof {
            x402_version: crate::X402_VERSION,
            scheme: requirement.scheme.clone(),
            network: requirement.network.clone(),
            payload: ProofPayload {
                from: self.signer.address(),
                value: value.to_string(),
                reference,
                timestamp,
                signature: encode_signature_hex(&sig),
            },
        })
    }
}
