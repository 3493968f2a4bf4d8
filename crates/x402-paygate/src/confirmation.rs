//! Source of truth for whether a Pending settlement went through on-chain.

use crate::tracker::SettlementRecord;
use crate::X402Error;

/// Answer from a single confirmation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed { transaction: Option<String> },
    Rejected { reason: String },
    /// Not final yet; ask again later.
    Unknown,
}

/// Checks the settlement of a referenced transfer.
///
/// Called repeatedly by the confirmation worker until it returns a final
/// answer or the record's deadline passes. Errors are treated as
/// [`ConfirmationStatus::Unknown`] and retried.
pub trait ConfirmationSource: Send + Sync {
    fn check(
        &self,
        record: &SettlementRecord,
    ) -> impl std::future::Future<Output = Result<ConfirmationStatus, X402Error>> + Send;
}
