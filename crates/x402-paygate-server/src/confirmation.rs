use x402::{ConfirmationSource, ConfirmationStatus, SettlementRecord, X402Error};

use crate::metrics::CONFIRMATION_CHECKS;

/// Wraps a [`ConfirmationSource`] and counts each answer.
#[derive(Debug)]
pub struct MeteredSource<S> {
    inner: S,
}

impl<S> MeteredSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: ConfirmationSource> ConfirmationSource for MeteredSource<S> {
    async fn check(&self, record: &SettlementRecord) -> Result<ConfirmationStatus, X402Error> {
        let result = self.inner.check(record).await;
        let answer = match &result {
            Ok(ConfirmationStatus::Confirmed { .. }) => "confirmed",
            Ok(ConfirmationStatus::Rejected { .. }) => "rejected",
            Ok(ConfirmationStatus::Unknown) => "unknown",
            Err(_) => "error",
        };
        CONFIRMATION_CHECKS.with_label_values(&[answer]).inc();
        result
    }
}
