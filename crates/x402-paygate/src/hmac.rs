use alloy::hex;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8]) -> HmacSha256 {
    // HMAC keys of any length are valid; new_from_slice only fails for
    // fixed-size MACs.
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// HMAC-SHA256 over `body`, hex-encoded.
///
/// Signs facilitator requests (`X-Facilitator-Auth`) and settlement receipts.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex HMAC-SHA256 signature over `body` in constant time.
///
/// Undecodable hex is compared as 32 zero bytes so that malformed and wrong
/// signatures take the same path.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = keyed(secret);
    mac.update(body);
    let expected = hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

/// Derive a purpose-bound key from a shared secret, so one secret can sign
/// facilitator requests and receipts without the MACs being interchangeable.
pub fn derive_key(secret: &[u8], purpose: &str) -> Vec<u8> {
    let mut mac = keyed(secret);
    mac.update(purpose.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_roundtrip() {
        let sig = compute_hmac(b"shared", b"{\"settlementId\":\"0x01\"}");
        assert_eq!(sig.len(), 64);
        assert!(verify_hmac(b"shared", b"{\"settlementId\":\"0x01\"}", &sig));
    }

    #[test]
    fn test_hmac_wrong_secret() {
        let sig = compute_hmac(b"secret-1", b"body");
        assert!(!verify_hmac(b"secret-2", b"body", &sig));
    }

    #[test]
    fn test_hmac_tampered_body() {
        let sig = compute_hmac(b"shared", b"amount=100000");
        assert!(!verify_hmac(b"shared", b"amount=100001", &sig));
    }

    #[test]
    fn test_hmac_invalid_hex() {
        assert!(!verify_hmac(b"shared", b"body", "zz-not-hex"));
        assert!(!verify_hmac(b"shared", b"body", "abc"));
    }

    #[test]
    fn test_derived_keys_are_purpose_bound() {
        let receipts = derive_key(b"shared", "x402-receipt");
        let requests = derive_key(b"shared", "x402-facilitator");
        assert_ne!(receipts, requests);
        assert_eq!(receipts, derive_key(b"shared", "x402-receipt"));
    }
}
