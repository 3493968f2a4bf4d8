//! EIP-712 typed-data signing and verification for payment proofs.
//!
//! - Domains are bound to the scheme's chain and the paid asset ([`payment_domain`])
//! - Signatures are checked with EIP-2 malleability protection ([`verify_signature`])
//! - Nonces come from the OS CSPRNG ([`random_nonce`])

use alloy::primitives::{keccak256, Address, FixedBytes, Signature, B256, U256};
use alloy::sol_types::SolStruct;

use crate::scheme::SchemeConfig;
use crate::PaymentAuthorization;
use crate::X402Error;

/// Build the EIP-712 domain for a scheme and asset.
pub fn payment_domain(scheme: &SchemeConfig, asset: Address) -> alloy::sol_types::Eip712Domain {
    alloy::sol_types::Eip712Domain {
        name: Some(std::borrow::Cow::Owned(scheme.eip712_domain_name.clone())),
        version: Some(std::borrow::Cow::Owned(
            scheme.eip712_domain_version.clone(),
        )),
        chain_id: Some(U256::from(scheme.chain_id)),
        verifying_contract: Some(asset),
        salt: None,
    }
}

/// Compute the EIP-712 signing hash of an authorization.
pub fn signing_hash(auth: &PaymentAuthorization, scheme: &SchemeConfig) -> B256 {
    auth.eip712_signing_hash(&payment_domain(scheme, auth.asset))
}

/// secp256k1 curve order N / 2. Signatures with s above it are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the signer of an authorization. Rejects anything but a 65-byte,
/// low-s signature.
pub fn verify_signature(
    auth: &PaymentAuthorization,
    signature_bytes: &[u8],
    scheme: &SchemeConfig,
) -> Result<Address, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| X402Error::SignatureError(format!("invalid signature: {e}")))?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(X402Error::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    let hash = signing_hash(auth, scheme);
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| X402Error::SignatureError(format!("recovery failed: {e}")))
}

/// Decode a `0x`-prefixed (or bare) hex signature.
pub fn decode_signature_hex(signature: &str) -> Result<Vec<u8>, X402Error> {
    alloy::hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
        .map_err(|e| X402Error::SignatureError(format!("invalid hex signature: {e}")))
}

/// Encode a signature as `0x` + 130 hex chars (v = 27/28 in the last byte).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Random 32-byte nonce (keccak256 of 32 CSPRNG bytes).
pub fn random_nonce() -> FixedBytes<32> {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

/// Deterministic settlement id for a signed reference on a network.
///
/// For `exact` the payer picks the nonce, so the payer is part of the id.
/// For confirmation schemes the reference is a transfer that exists once on
/// chain, so pass `None` and the reference alone identifies the settlement no
/// matter which key cites it.
pub fn settlement_id(
    network: &str,
    payer: Option<Address>,
    reference: &FixedBytes<32>,
) -> String {
    let mut preimage = Vec::with_capacity(network.len() + 1 + 20 + 32);
    preimage.extend_from_slice(network.as_bytes());
    preimage.push(0);
    if let Some(payer) = payer {
        preimage.extend_from_slice(payer.as_slice());
    }
    preimage.extend_from_slice(reference.as_slice());
    alloy::hex::encode_prefixed(keccak256(preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn scheme() -> SchemeConfig {
        SchemeConfig::exact(crate::DEFAULT_NETWORK, crate::DEFAULT_CHAIN_ID)
    }

    fn auth(from: Address) -> PaymentAuthorization {
        PaymentAuthorization {
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(100_000u64),
            asset: crate::DEFAULT_ASSET,
            resource: "/api/intel".to_string(),
            nonce: FixedBytes::new([0x33; 32]),
            timestamp: U256::from(1_700_000_000u64),
        }
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let signer = PrivateKeySigner::random();
        let auth = auth(signer.address());
        let sig = signer.sign_hash_sync(&signing_hash(&auth, &scheme())).unwrap();
        let bytes = decode_signature_hex(&encode_signature_hex(&sig)).unwrap();

        let recovered = verify_signature(&auth, &bytes, &scheme()).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_domain_binds_chain_id() {
        let signer = PrivateKeySigner::random();
        let auth = auth(signer.address());
        let sig = signer.sign_hash_sync(&signing_hash(&auth, &scheme())).unwrap();

        let other_chain = SchemeConfig::exact("eip155:1", 1);
        let recovered = verify_signature(&auth, &sig.as_bytes(), &other_chain).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = verify_signature(&auth(Address::ZERO), &[0xde, 0xad], &scheme()).unwrap_err();
        assert!(matches!(err, X402Error::SignatureError(_)));
    }

    #[test]
    fn test_rejects_high_s() {
        let sig = Signature::new(U256::from(1u64), U256::MAX - U256::from(1u64), false);
        let result = verify_signature(&auth(Address::ZERO), &sig.as_bytes(), &scheme());
        assert!(result.is_err());
    }

    #[test]
    fn test_random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[test]
    fn test_settlement_id_is_deterministic() {
        let payer = Some(Address::repeat_byte(0x01));
        let reference = FixedBytes::new([0x02; 32]);
        let a = settlement_id("eip155:42431", payer, &reference);
        assert_eq!(a, settlement_id("eip155:42431", payer, &reference));
        assert_ne!(a, settlement_id("eip155:1", payer, &reference));
        assert_ne!(
            a,
            settlement_id("eip155:42431", Some(Address::repeat_byte(0x03)), &reference)
        );
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn test_unbound_settlement_id_ignores_payer() {
        let reference = FixedBytes::new([0x77; 32]);
        let tx = settlement_id("eip155:42431", None, &reference);
        assert_ne!(
            tx,
            settlement_id("eip155:42431", Some(Address::repeat_byte(0x01)), &reference)
        );
        assert_eq!(tx, settlement_id("eip155:42431", None, &reference));
        assert_ne!(tx, settlement_id("eip155:1", None, &reference));
    }
}
