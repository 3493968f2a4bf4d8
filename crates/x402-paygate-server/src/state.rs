use std::sync::Arc;

use x402::{PaymentVerifier, RequirementsPublisher, SettlementStore, SettlementTracker};

use crate::config::{ConfigError, GatewayConfig};

pub use x402::RECEIPT_KEY_PURPOSE;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub publisher: Arc<RequirementsPublisher>,
    pub verifier: PaymentVerifier,
    /// Receipt MAC key derived from the facilitator secret (None = unsigned receipts)
    pub receipt_key: Option<Arc<[u8]>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, store: Arc<dyn SettlementStore>) -> Result<Self, ConfigError> {
        let publisher = config.publisher()?;
        let verifier = PaymentVerifier::new(config.schemes()?, SettlementTracker::new(store));
        let receipt_key = config
            .hmac_secret
            .as_deref()
            .map(|secret| Arc::from(x402::hmac::derive_key(secret, RECEIPT_KEY_PURPOSE)));

        Ok(Self {
            config: Arc::new(config),
            publisher: Arc::new(publisher),
            verifier,
            receipt_key,
        })
    }

    pub fn tracker(&self) -> &SettlementTracker {
        self.verifier.tracker()
    }
}
