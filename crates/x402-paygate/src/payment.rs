use alloy::primitives::{Address, FixedBytes, U256};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{X402Error, X402_VERSION};

/// Upper bound on an encoded `X-Payment` header. Anything larger is rejected
/// before base64 decoding.
pub const MAX_PAYMENT_HEADER_LEN: usize = 8 * 1024;

/// A single entry in the `accepts` array of a 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    /// Required amount in the asset's smallest unit, as a decimal string.
    pub max_amount_required: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    pub asset: Address,
    /// Scheme-specific data, opaque to the gate.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PaymentRequirement {
    /// Parse the required amount as an integer. Never goes through floats.
    pub fn required_amount(&self) -> Result<U256, X402Error> {
        self.max_amount_required.parse::<U256>().map_err(|e| {
            X402Error::InvalidPayment(format!(
                "invalid required amount '{}': {e}",
                self.max_amount_required
            ))
        })
    }
}

/// The payment options published for one protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsDocument {
    pub x402_version: u32,
    pub accepts: Vec<PaymentRequirement>,
}

impl PaymentRequirementsDocument {
    /// Build a document, enforcing that `accepts` is non-empty and that every
    /// entry references the same resource.
    pub fn new(accepts: Vec<PaymentRequirement>) -> Result<Self, X402Error> {
        let first = accepts.first().ok_or_else(|| {
            X402Error::ConfigError("requirements document needs at least one entry".to_string())
        })?;
        if let Some(other) = accepts.iter().find(|r| r.resource != first.resource) {
            return Err(X402Error::ConfigError(format!(
                "requirements reference different resources: '{}' and '{}'",
                first.resource, other.resource
            )));
        }
        Ok(Self {
            x402_version: X402_VERSION,
            accepts,
        })
    }

    /// The protected resource all entries refer to.
    pub fn resource(&self) -> &str {
        self.accepts
            .first()
            .map(|r| r.resource.as_str())
            .unwrap_or_default()
    }

    /// First requirement matching the given scheme and network.
    pub fn find(&self, scheme: &str, network: &str) -> Option<&PaymentRequirement> {
        self.accepts
            .iter()
            .find(|r| r.scheme == scheme && r.network == network)
    }

    /// Compact JSON suitable for the `X-Payment-Response` header of a 402.
    pub fn to_header_value(&self) -> Result<String, X402Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Body of a 402 response: the requirements document plus an error summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: String,
    /// Machine-readable rejection code, absent on the initial 402.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set while a settlement awaits confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<String>,
    #[serde(flatten)]
    pub document: PaymentRequirementsDocument,
}

impl PaymentRequiredBody {
    pub fn new(document: PaymentRequirementsDocument) -> Self {
        Self {
            error: "Payment Required".to_string(),
            reason: None,
            message: None,
            settlement_id: None,
            document,
        }
    }
}

/// Signed part of a payment proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    pub from: Address,
    /// Claimed amount in the asset's smallest unit, as a decimal string.
    pub value: String,
    /// Unique transaction reference: a random nonce for `exact`, the
    /// transfer's transaction hash for `exact-onchain`.
    pub reference: FixedBytes<32>,
    /// Unix seconds at which the payer signed the proof.
    pub timestamp: u64,
    /// 65-byte EIP-712 signature, hex with `0x` prefix.
    pub signature: String,
}

/// Wire-format payment proof (sent in the `X-Payment` header, base64-encoded JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ProofPayload,
}

impl PaymentProof {
    /// Decode an `X-Payment` header value.
    pub fn decode_header(header_value: &str) -> Result<Self, X402Error> {
        let trimmed = header_value.trim();
        if trimmed.len() > MAX_PAYMENT_HEADER_LEN {
            return Err(X402Error::InvalidPayment(format!(
                "payment header too large: {} bytes",
                trimmed.len()
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(trimmed)
            .map_err(|e| X402Error::InvalidPayment(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| X402Error::InvalidPayment(format!("invalid JSON payload: {e}")))
    }

    /// Base64-encode the proof for the `X-Payment` header.
    pub fn encode_header(&self) -> Result<String, X402Error> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn claimed_amount(&self) -> Result<U256, X402Error> {
        self.payload.value.parse::<U256>().map_err(|e| {
            X402Error::InvalidPayment(format!("invalid amount '{}': {e}", self.payload.value))
        })
    }
}
