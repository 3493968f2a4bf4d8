//! Client SDK for x402-gated APIs.
//!
//! Handles the 402 flow end to end: request, read the requirements, sign a
//! proof, retry with `X-Payment`, and wait out pending on-chain settlements.
//!
//! # Quick Example
//!
//! ```no_run
//! use alloy::signers::local::PrivateKeySigner;
//! use x402_paygate_client::{PaymentSigner, X402Client};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), x402_paygate_client::X402Error> {
//! let signer: PrivateKeySigner = PrivateKeySigner::random();
//! let client = X402Client::new(PaymentSigner::new(signer))?;
//!
//! let (resp, receipt) = client
//!     .fetch("http://localhost:3402/api/intel?token=So11111111111111111111111111111111111111112", reqwest::Method::GET)
//!     .await?;
//!
//! if let Some(r) = receipt {
//!     println!("Paid, settlement {}", r.settlement_id);
//! }
//! # let _ = resp;
//! # Ok(())
//! # }
//! ```

mod http_client;

pub use http_client::{select_requirement, settlement_url, X402Client};

// Re-export commonly needed types from core
pub use x402::{
    PaymentProof, PaymentReceipt, PaymentRequiredBody, PaymentRequirement, PaymentSigner,
    SettlementRecord, SettlementStatus, X402Error,
};
