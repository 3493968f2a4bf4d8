//! x402 payment gate core.
//!
//! Gates HTTP resources behind `402 Payment Required` using EIP-712 signed
//! payment proofs, with exactly-once acceptance per settlement reference.
//!
//! # Components
//!
//! - **Requirements publisher** ([`RequirementsPublisher`]): builds the
//!   payment-requirements document for a priced resource
//! - **Payment verifier** ([`PaymentVerifier`]): checks a proof's scheme,
//!   amount, signature and freshness, then claims its settlement id
//! - **Settlement tracker** ([`SettlementTracker`]): records settlements,
//!   rejects replays and drives asynchronous on-chain confirmation
//!
//! # Quick example (gateway side)
//!
//! ```no_run
//! use std::sync::Arc;
//! use alloy::primitives::Address;
//! use x402::{
//!     InMemorySettlementStore, PaymentVerifier, PublisherConfig, RequirementsPublisher,
//!     SchemeRegistry, SettlementTracker,
//! };
//!
//! let schemes = SchemeRegistry::default();
//! let publisher = RequirementsPublisher::new(
//!     PublisherConfig::new(Address::ZERO)
//!         .with_price("/api/intel", "100000", Some("Token intelligence"))
//!         .unwrap(),
//!     schemes.clone(),
//! );
//! let tracker = SettlementTracker::new(Arc::new(InMemorySettlementStore::new()));
//! let verifier = PaymentVerifier::new(schemes, tracker);
//!
//! let document = publisher.build_requirements("/api/intel").unwrap();
//! assert_eq!(document.accepts.len(), 1);
//! # let _ = verifier;
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod hmac;
pub mod payment;
pub mod response;
pub mod scheme;
pub mod security;
pub mod time;

// Signing and verification
pub mod eip712;
pub mod publisher;
pub mod signer;
pub mod verifier;

// Settlement tracking
pub mod confirmation;
pub mod facilitator_client;
pub mod store;
pub mod tracker;

use alloy::sol;

// EIP-712 struct signed by the payer. Binds the recipient, amount, asset and
// resource of the chosen requirement to a unique reference and issue time.
sol! {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct PaymentAuthorization {
        address from;
        address to;
        uint256 value;
        address asset;
        string resource;
        bytes32 nonce;
        uint256 timestamp;
    }
}

// Re-exports
pub use constants::*;
pub use error::X402Error;
pub use payment::*;
pub use response::*;
pub use scheme::{SchemeConfig, SchemeRegistry, SettlementMode};

pub use confirmation::{ConfirmationSource, ConfirmationStatus};
pub use facilitator_client::FacilitatorClient;
pub use publisher::{PriceEntry, PublisherConfig, RequirementsPublisher};
pub use signer::PaymentSigner;
pub use store::{InMemorySettlementStore, InsertOutcome, SettlementStore, SqliteSettlementStore};
pub use tracker::{
    ConfirmOutcome, ConfirmationOutcome, SettlementRecord, SettlementStatus, SettlementTracker,
};
pub use verifier::{PaymentVerifier, RejectReason, VerificationResult};
