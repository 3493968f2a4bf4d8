//! Settlement storage backends.
//!
//! Every mutation a backend exposes is a single atomic step: insert-if-absent,
//! a Pending-only status transition, and a one-shot redeem flag. The tracker
//! builds its guarantees on those three and nothing else.

use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, B256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::tracker::{ConfirmationOutcome, SettlementRecord, SettlementStatus};
use crate::X402Error;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another record already holds the id; it is returned unchanged.
    Exists(SettlementRecord),
}

/// Trait for settlement storage backends.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait SettlementStore: Send + Sync {
    /// Insert `record` unless its id is already present. Atomic per id.
    fn insert(&self, record: &SettlementRecord) -> Result<InsertOutcome, X402Error>;

    fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, X402Error>;

    /// Apply `outcome` to a Pending record. Returns `false` when the record is
    /// unknown or already terminal, leaving it untouched.
    fn resolve(
        &self,
        settlement_id: &str,
        outcome: &ConfirmationOutcome,
        now: u64,
    ) -> Result<bool, X402Error>;

    /// Flip `redeemed` on a Confirmed record. Returns `true` exactly once.
    fn mark_redeemed(&self, settlement_id: &str, now: u64) -> Result<bool, X402Error>;

    /// Ids of Pending records whose deadline is at or before `now`.
    fn overdue_pending(&self, now: u64) -> Result<Vec<String>, X402Error>;

    /// Delete terminal records last updated before `cutoff`. Returns number purged.
    fn purge_terminal(&self, cutoff: u64) -> Result<usize, X402Error>;
}

/// In-memory settlement store backed by DashMap. Fast but lost on restart.
pub struct InMemorySettlementStore {
    records: DashMap<String, SettlementRecord>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemorySettlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementStore for InMemorySettlementStore {
    fn insert(&self, record: &SettlementRecord) -> Result<InsertOutcome, X402Error> {
        // The entry holds the shard lock, so check and insert are one step.
        match self.records.entry(record.settlement_id.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Exists(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, X402Error> {
        Ok(self.records.get(settlement_id).map(|r| r.value().clone()))
    }

    fn resolve(
        &self,
        settlement_id: &str,
        outcome: &ConfirmationOutcome,
        now: u64,
    ) -> Result<bool, X402Error> {
        let Some(mut record) = self.records.get_mut(settlement_id) else {
            return Ok(false);
        };
        if record.status != SettlementStatus::Pending {
            return Ok(false);
        }
        record.status = outcome.status();
        record.transaction = outcome.transaction().map(String::from);
        record.failure_reason = outcome.failure_reason().map(String::from);
        record.updated_at = now;
        Ok(true)
    }

    fn mark_redeemed(&self, settlement_id: &str, now: u64) -> Result<bool, X402Error> {
        let Some(mut record) = self.records.get_mut(settlement_id) else {
            return Ok(false);
        };
        if record.status != SettlementStatus::Confirmed || record.redeemed {
            return Ok(false);
        }
        record.redeemed = true;
        record.updated_at = now;
        Ok(true)
    }

    fn overdue_pending(&self, now: u64) -> Result<Vec<String>, X402Error> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == SettlementStatus::Pending && r.expires_at <= now)
            .map(|r| r.key().clone())
            .collect())
    }

    fn purge_terminal(&self, cutoff: u64) -> Result<usize, X402Error> {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.status == SettlementStatus::Pending || r.updated_at >= cutoff);
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// Persistent settlement store backed by SQLite. Survives restarts.
pub struct SqliteSettlementStore {
    conn: Mutex<rusqlite::Connection>,
}

const SELECT_COLUMNS: &str = "settlement_id, resource, amount, recipient, payer, network, \
     scheme, reference, status, redeemed, created_at, updated_at, expires_at, tx_hash, \
     failure_reason";

impl SqliteSettlementStore {
    /// Open (or create) a SQLite settlement database at the given path.
    ///
    /// On Unix the file is restricted to 0600: it records who paid for what.
    pub fn open(path: &str) -> Result<Self, X402Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settlements (
                settlement_id TEXT PRIMARY KEY,
                resource TEXT NOT NULL,
                amount TEXT NOT NULL,
                recipient TEXT NOT NULL,
                payer TEXT NOT NULL,
                network TEXT NOT NULL,
                scheme TEXT NOT NULL,
                reference BLOB NOT NULL,
                status TEXT NOT NULL,
                redeemed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                tx_hash TEXT,
                failure_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_settlements_status
                ON settlements(status, expires_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set settlement database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("settlement store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn select(
        conn: &rusqlite::Connection,
        settlement_id: &str,
    ) -> Result<Option<SettlementRecord>, X402Error> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM settlements WHERE settlement_id = ?1");
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query([settlement_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(RawRow::read(row)?.into_record()?)),
            None => Ok(None),
        }
    }
}

/// Column values as stored, before parsing back into typed fields.
struct RawRow {
    settlement_id: String,
    resource: String,
    amount: String,
    recipient: String,
    payer: String,
    network: String,
    scheme: String,
    reference: Vec<u8>,
    status: String,
    redeemed: bool,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
    tx_hash: Option<String>,
    failure_reason: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            settlement_id: row.get(0)?,
            resource: row.get(1)?,
            amount: row.get(2)?,
            recipient: row.get(3)?,
            payer: row.get(4)?,
            network: row.get(5)?,
            scheme: row.get(6)?,
            reference: row.get(7)?,
            status: row.get(8)?,
            redeemed: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            expires_at: row.get(12)?,
            tx_hash: row.get(13)?,
            failure_reason: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<SettlementRecord, X402Error> {
        let corrupt = |field: &str, e: String| {
            X402Error::StoreError(format!(
                "corrupt {field} for settlement {}: {e}",
                self.settlement_id
            ))
        };
        let recipient = self
            .recipient
            .parse::<Address>()
            .map_err(|e| corrupt("recipient", e.to_string()))?;
        let payer = self
            .payer
            .parse::<Address>()
            .map_err(|e| corrupt("payer", e.to_string()))?;
        let reference = B256::try_from(self.reference.as_slice())
            .map_err(|e| corrupt("reference", e.to_string()))?;
        let status = self
            .status
            .parse::<SettlementStatus>()
            .map_err(|e| corrupt("status", e.to_string()))?;

        Ok(SettlementRecord {
            settlement_id: self.settlement_id,
            resource: self.resource,
            amount: self.amount,
            recipient,
            payer,
            network: self.network,
            scheme: self.scheme,
            reference,
            status,
            redeemed: self.redeemed,
            created_at: from_secs(self.created_at),
            updated_at: from_secs(self.updated_at),
            expires_at: from_secs(self.expires_at),
            transaction: self.tx_hash,
            failure_reason: self.failure_reason,
        })
    }
}

fn to_secs(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_secs(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

impl SettlementStore for SqliteSettlementStore {
    fn insert(&self, record: &SettlementRecord) -> Result<InsertOutcome, X402Error> {
        let conn = self.conn();
        // The PRIMARY KEY makes this atomic even across processes sharing the file.
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO settlements (settlement_id, resource, amount, recipient, \
             payer, network, scheme, reference, status, redeemed, created_at, updated_at, \
             expires_at, tx_hash, failure_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                record.settlement_id,
                record.resource,
                record.amount,
                record.recipient.to_string(),
                record.payer.to_string(),
                record.network,
                record.scheme,
                record.reference.as_slice(),
                record.status.as_str(),
                record.redeemed,
                to_secs(record.created_at),
                to_secs(record.updated_at),
                to_secs(record.expires_at),
                record.transaction,
                record.failure_reason,
            ],
        )?;
        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }
        Self::select(&conn, &record.settlement_id)?
            .map(InsertOutcome::Exists)
            .ok_or_else(|| {
                X402Error::StoreError(format!(
                    "settlement {} neither inserted nor found",
                    record.settlement_id
                ))
            })
    }

    fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, X402Error> {
        Self::select(&self.conn(), settlement_id)
    }

    fn resolve(
        &self,
        settlement_id: &str,
        outcome: &ConfirmationOutcome,
        now: u64,
    ) -> Result<bool, X402Error> {
        let changed = self.conn().execute(
            "UPDATE settlements SET status = ?2, tx_hash = ?3, failure_reason = ?4, \
             updated_at = ?5 WHERE settlement_id = ?1 AND status = 'pending'",
            rusqlite::params![
                settlement_id,
                outcome.status().as_str(),
                outcome.transaction(),
                outcome.failure_reason(),
                to_secs(now),
            ],
        )?;
        Ok(changed == 1)
    }

    fn mark_redeemed(&self, settlement_id: &str, now: u64) -> Result<bool, X402Error> {
        let changed = self.conn().execute(
            "UPDATE settlements SET redeemed = 1, updated_at = ?2 \
             WHERE settlement_id = ?1 AND status = 'confirmed' AND redeemed = 0",
            rusqlite::params![settlement_id, to_secs(now)],
        )?;
        Ok(changed == 1)
    }

    fn overdue_pending(&self, now: u64) -> Result<Vec<String>, X402Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT settlement_id FROM settlements WHERE status = 'pending' AND expires_at <= ?1",
        )?;
        let ids = stmt
            .query_map([to_secs(now)], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn purge_terminal(&self, cutoff: u64) -> Result<usize, X402Error> {
        let purged = self.conn().execute(
            "DELETE FROM settlements WHERE status != 'pending' AND updated_at < ?1",
            rusqlite::params![to_secs(cutoff)],
        )?;
        Ok(purged)
    }
}
