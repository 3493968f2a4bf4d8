//! Settlement lifecycle: `Pending → Confirmed | Failed`.
//!
//! The tracker is the only writer of settlement status. Records are created
//! by [`SettlementTracker::record`], moved out of Pending once by
//! [`SettlementTracker::confirm`], and granted access at most once by
//! [`SettlementTracker::redeem`]. Terminal records never change status again.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use alloy::primitives::{Address, FixedBytes};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::confirmation::{ConfirmationSource, ConfirmationStatus};
use crate::store::{InsertOutcome, SettlementStore};
use crate::time::unix_now;
use crate::X402Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != SettlementStatus::Pending
    }
}

impl FromStr for SettlementStatus {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "confirmed" => Ok(SettlementStatus::Confirmed),
            "failed" => Ok(SettlementStatus::Failed),
            other => Err(X402Error::StoreError(format!(
                "unknown settlement status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified payment, keyed by its settlement id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub settlement_id: String,
    pub resource: String,
    /// Claimed amount in the asset's smallest unit.
    pub amount: String,
    pub recipient: Address,
    pub payer: Address,
    pub network: String,
    pub scheme: String,
    pub reference: FixedBytes<32>,
    pub status: SettlementStatus,
    /// Access has been granted for this settlement.
    pub redeemed: bool,
    pub created_at: u64,
    pub updated_at: u64,
    /// A Pending record still unresolved at this time fails as timed out.
    pub expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// What a confirmation check concluded about a Pending settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed { transaction: Option<String> },
    Rejected { reason: String },
    /// No conclusion before the settlement's deadline.
    TimedOut,
}

impl ConfirmationOutcome {
    pub fn status(&self) -> SettlementStatus {
        match self {
            ConfirmationOutcome::Confirmed { .. } => SettlementStatus::Confirmed,
            ConfirmationOutcome::Rejected { .. } | ConfirmationOutcome::TimedOut => {
                SettlementStatus::Failed
            }
        }
    }

    pub fn transaction(&self) -> Option<&str> {
        match self {
            ConfirmationOutcome::Confirmed { transaction } => transaction.as_deref(),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ConfirmationOutcome::Confirmed { .. } => None,
            ConfirmationOutcome::Rejected { reason } => Some(reason),
            ConfirmationOutcome::TimedOut => Some("confirmation timed out"),
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Confirmed { .. } => "confirmed",
            ConfirmationOutcome::Rejected { .. } => "rejected",
            ConfirmationOutcome::TimedOut => "timed_out",
        }
    }
}

/// What [`SettlementTracker::confirm`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied,
    /// Record was already Confirmed or Failed; nothing changed.
    AlreadyTerminal,
    Unknown,
}

/// Shared settlement state. Cheap to clone; all clones see the same store.
#[derive(Clone)]
pub struct SettlementTracker {
    store: Arc<dyn SettlementStore>,
    queue: Arc<OnceLock<mpsc::UnboundedSender<String>>>,
}

impl SettlementTracker {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self {
            store,
            queue: Arc::new(OnceLock::new()),
        }
    }

    /// Atomically insert `record` unless its id is already tracked.
    pub fn record(&self, record: SettlementRecord) -> Result<InsertOutcome, X402Error> {
        let outcome = self.store.insert(&record)?;
        if outcome == InsertOutcome::Inserted {
            tracing::info!(
                settlement_id = %record.settlement_id,
                payer = %record.payer,
                status = %record.status,
                "settlement recorded"
            );
        }
        Ok(outcome)
    }

    pub fn lookup(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, X402Error> {
        self.store.get(settlement_id)
    }

    /// Resolve a Pending settlement. A no-op on terminal records.
    pub fn confirm(
        &self,
        settlement_id: &str,
        outcome: ConfirmationOutcome,
    ) -> Result<ConfirmOutcome, X402Error> {
        self.confirm_at(settlement_id, outcome, unix_now())
    }

    pub fn confirm_at(
        &self,
        settlement_id: &str,
        outcome: ConfirmationOutcome,
        now: u64,
    ) -> Result<ConfirmOutcome, X402Error> {
        if self.store.resolve(settlement_id, &outcome, now)? {
            tracing::info!(
                settlement_id = %settlement_id,
                outcome = outcome.label(),
                "settlement resolved"
            );
            return Ok(ConfirmOutcome::Applied);
        }
        match self.store.get(settlement_id)? {
            Some(_) => Ok(ConfirmOutcome::AlreadyTerminal),
            None => Ok(ConfirmOutcome::Unknown),
        }
    }

    /// Grant access for a Confirmed settlement. `true` exactly once per id.
    pub fn redeem(&self, settlement_id: &str) -> Result<bool, X402Error> {
        self.store.mark_redeemed(settlement_id, unix_now())
    }

    /// Fail every Pending settlement whose deadline has passed.
    pub fn expire_overdue(&self, now: u64) -> Result<usize, X402Error> {
        let mut expired = 0;
        for id in self.store.overdue_pending(now)? {
            if self.confirm_at(&id, ConfirmationOutcome::TimedOut, now)? == ConfirmOutcome::Applied
            {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::warn!(expired, "pending settlements timed out");
        }
        Ok(expired)
    }

    /// Look up a settlement for a polling client, failing it first if overdue,
    /// so a poll after the deadline always sees a terminal status.
    pub fn poll(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, X402Error> {
        self.poll_at(settlement_id, unix_now())
    }

    pub fn poll_at(
        &self,
        settlement_id: &str,
        now: u64,
    ) -> Result<Option<SettlementRecord>, X402Error> {
        let Some(record) = self.store.get(settlement_id)? else {
            return Ok(None);
        };
        if record.status == SettlementStatus::Pending && record.expires_at <= now {
            self.confirm_at(settlement_id, ConfirmationOutcome::TimedOut, now)?;
            return self.store.get(settlement_id);
        }
        Ok(Some(record))
    }

    /// Drop terminal records untouched for `retention_secs`.
    pub fn purge_terminal(&self, retention_secs: u64, now: u64) -> Result<usize, X402Error> {
        self.store.purge_terminal(now.saturating_sub(retention_secs))
    }

    /// Queue a Pending settlement for background confirmation.
    ///
    /// Without a running worker the record is left to the expiry sweeper.
    pub fn enqueue(&self, settlement_id: &str) {
        match self.queue.get() {
            Some(tx) => {
                if tx.send(settlement_id.to_string()).is_err() {
                    tracing::error!(
                        settlement_id = %settlement_id,
                        "confirmation worker stopped; settlement will time out"
                    );
                }
            }
            None => tracing::warn!(
                settlement_id = %settlement_id,
                "no confirmation worker running; settlement will time out"
            ),
        }
    }

    /// Start the background confirmation worker.
    ///
    /// Each queued settlement is checked against `source` every
    /// `poll_interval` until it resolves or its deadline passes, at which
    /// point it is failed as timed out. Checks run concurrently per
    /// settlement and never block the request that queued them.
    pub fn start_confirmation_worker<S>(
        &self,
        source: Arc<S>,
        poll_interval: Duration,
    ) -> Result<tokio::task::JoinHandle<()>, X402Error>
    where
        S: ConfirmationSource + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.queue
            .set(tx)
            .map_err(|_| X402Error::ConfigError("confirmation worker already running".into()))?;

        let tracker = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(settlement_id) = rx.recv().await {
                let tracker = tracker.clone();
                let source = Arc::clone(&source);
                tokio::spawn(async move {
                    if let Err(e) = tracker
                        .drive_confirmation(&settlement_id, source.as_ref(), poll_interval)
                        .await
                    {
                        tracing::error!(
                            settlement_id = %settlement_id,
                            error = %e,
                            "confirmation check aborted"
                        );
                    }
                });
            }
        }))
    }

    async fn drive_confirmation<S: ConfirmationSource>(
        &self,
        settlement_id: &str,
        source: &S,
        poll_interval: Duration,
    ) -> Result<(), X402Error> {
        loop {
            let Some(record) = self.store.get(settlement_id)? else {
                return Ok(());
            };
            if record.status.is_terminal() {
                return Ok(());
            }
            let now = unix_now();
            if record.expires_at <= now {
                self.confirm_at(settlement_id, ConfirmationOutcome::TimedOut, now)?;
                return Ok(());
            }

            let outcome = match source.check(&record).await {
                Ok(ConfirmationStatus::Confirmed { transaction }) => {
                    Some(ConfirmationOutcome::Confirmed { transaction })
                }
                Ok(ConfirmationStatus::Rejected { reason }) => {
                    Some(ConfirmationOutcome::Rejected { reason })
                }
                Ok(ConfirmationStatus::Unknown) => None,
                Err(e) => {
                    tracing::warn!(
                        settlement_id = %settlement_id,
                        error = %e,
                        "confirmation check failed, retrying"
                    );
                    None
                }
            };

            if let Some(outcome) = outcome {
                self.confirm(settlement_id, outcome)?;
                return Ok(());
            }

            let remaining = record.expires_at.saturating_sub(unix_now());
            tokio::time::sleep(poll_interval.min(Duration::from_secs(remaining.max(1)))).await;
        }
    }

    /// Start a background task that fails overdue Pending settlements and
    /// purges old terminal ones every `interval`.
    pub fn start_expiry_sweeper(
        &self,
        interval: Duration,
        retention_secs: u64,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = unix_now();
                if let Err(e) = tracker.expire_overdue(now) {
                    tracing::error!(error = %e, "failed to expire overdue settlements");
                }
                match tracker.purge_terminal(retention_secs, now) {
                    Ok(purged) if purged > 0 => {
                        tracing::info!(purged, "purged terminal settlements")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "failed to purge settlements"),
                }
            }
        })
    }
}

impl std::fmt::Debug for SettlementTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementTracker")
            .field("worker_running", &self.queue.get().is_some())
            .finish_non_exhaustive()
    }
}
