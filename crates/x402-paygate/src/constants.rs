use alloy::primitives::Address;

/// x402 protocol version carried in every requirements document and proof.
pub const X402_VERSION: u32 = 1;

/// Scheme whose signed authorization is final: access is granted immediately.
pub const SCHEME_EXACT: &str = "exact";

/// Scheme whose payment must be confirmed on-chain before access is granted.
pub const SCHEME_EXACT_ONCHAIN: &str = "exact-onchain";

/// Tempo Moderato chain ID.
pub const DEFAULT_CHAIN_ID: u64 = 42431;

/// CAIP-2 network identifier for Tempo Moderato.
pub const DEFAULT_NETWORK: &str = "eip155:42431";

/// pathUSD token address on Tempo Moderato testnet.
pub const DEFAULT_ASSET: Address = Address::new([
    0x20, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
]);

/// pathUSD has 6 decimal places.
pub const TOKEN_DECIMALS: u32 = 6;

/// How long a signed proof stays fresh, and how long a pending settlement
/// may wait for confirmation.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// Tolerated drift between a payer's clock and ours for future-dated proofs.
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 60;

/// Suggested client back-off while a settlement is pending.
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 5;

/// Request header carrying the base64-encoded payment proof.
pub const PAYMENT_HEADER: &str = "X-Payment";

/// Response header carrying the requirements document (402) or the
/// settlement receipt (200).
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// Key purpose for `X-Payment-Response` receipt MACs, see [`crate::hmac::derive_key`].
pub const RECEIPT_KEY_PURPOSE: &str = "x402-paygate-receipt";

/// Facilitator used when none is configured.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// EIP-712 domain name for payment authorizations.
pub const EIP712_DOMAIN_NAME: &str = "x402-paygate";

/// EIP-712 domain version for payment authorizations.
pub const EIP712_DOMAIN_VERSION: &str = "1";
