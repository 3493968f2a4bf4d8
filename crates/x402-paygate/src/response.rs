use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::X402Error;

/// Response from the facilitator's `/settle` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
    /// Transaction hash, if settlement succeeded. `None` on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub network: String,
    /// The facilitator has seen the transaction but it is not final yet.
    #[serde(default)]
    pub pending: bool,
}

/// Settlement receipt returned to the client in `X-Payment-Response` once
/// access is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub success: bool,
    pub settlement_id: String,
    pub network: String,
    pub payer: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

impl PaymentReceipt {
    /// Encode as `base64(json)`, or `base64(json).hmac_hex` when a key is
    /// given so clients can authenticate the receipt.
    pub fn to_header_value(&self, hmac_key: Option<&[u8]>) -> Result<String, X402Error> {
        let json = serde_json::to_vec(self)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(match hmac_key {
            Some(key) => {
                let mac = crate::hmac::compute_hmac(key, encoded.as_bytes());
                format!("{encoded}.{mac}")
            }
            None => encoded,
        })
    }

    /// Decode a receipt header, ignoring any trailing HMAC.
    pub fn from_header_value(value: &str) -> Result<Self, X402Error> {
        let encoded = value.split('.').next().unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| X402Error::InvalidPayment(format!("invalid receipt encoding: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Decode a receipt header, requiring a valid HMAC under `hmac_key`.
    pub fn from_signed_header_value(value: &str, hmac_key: &[u8]) -> Result<Self, X402Error> {
        let (encoded, mac) = value
            .split_once('.')
            .ok_or_else(|| X402Error::SignatureError("receipt is not signed".to_string()))?;
        if !crate::hmac::verify_hmac(hmac_key, encoded.as_bytes(), mac) {
            return Err(X402Error::SignatureError(
                "receipt HMAC does not match".to_string(),
            ));
        }
        Self::from_header_value(encoded)
    }
}
