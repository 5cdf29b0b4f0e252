//! Durable command journal using RocksDB
//!
//! # Column Families
//!
//! - `journal` - Committed commands (key: sequence, big-endian)
//! - `meta` - Journal head (last sequence and hash) and genesis settings
//! - `outbox` - Transfers committed but not yet acknowledged (key: transfer ID)
//!
//! Every entry is hash-chained to its predecessor with SHA-256, so replay can
//! detect a truncated, reordered or edited journal.

use crate::{
    apps::AppRegistration,
    config::JournalConfig,
    error::{Error, Result},
    payout::Transfer,
    settings::ProtocolSettings,
    types::{Amount, AppId, Principal, Role},
};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Column family names
const CF_JOURNAL: &str = "journal";
const CF_META: &str = "meta";
const CF_OUTBOX: &str = "outbox";

/// Meta key for the journal head
const KEY_HEAD: &[u8] = b"head";

/// Meta key for the settings the journal started from
const KEY_GENESIS: &[u8] = b"genesis";

/// Hash preceding the first entry
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// A mutating ledger operation, as accepted and replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Register an app
    RegisterApp {
        /// Owner
        owner: Principal,
        /// Listing metadata
        registration: AppRegistration,
        /// Fee plus initial escrow
        payment: Amount,
    },
    /// Top up escrow
    AddEscrow {
        /// App
        app_id: AppId,
        /// Caller (must own the app)
        caller: Principal,
        /// Deposit
        amount: Amount,
    },
    /// Withdraw the full escrow
    WithdrawEscrow {
        /// App
        app_id: AppId,
        /// Caller (must own the app)
        caller: Principal,
    },
    /// Deactivate an app
    DeactivateApp {
        /// App
        app_id: AppId,
        /// Caller (must own the app)
        caller: Principal,
    },
    /// Submit rated feedback
    SubmitFeedback {
        /// App
        app_id: AppId,
        /// Reviewer
        reviewer: Principal,
        /// Rating 1..=5
        rating: u8,
        /// Comment
        comment: String,
    },
    /// Replace protocol settings
    UpdateSettings {
        /// Caller
        caller: Principal,
        /// Caller role
        role: Role,
        /// New settings
        settings: ProtocolSettings,
    },
    /// Pay out accrued owner shares
    ClaimOwnerRewards {
        /// Owner
        owner: Principal,
    },
    /// Pay out the protocol treasury
    WithdrawProtocolFees {
        /// Caller
        caller: Principal,
        /// Caller role
        role: Role,
        /// Beneficiary
        recipient: Principal,
    },
}

impl Command {
    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterApp { .. } => "register_app",
            Command::AddEscrow { .. } => "add_escrow",
            Command::WithdrawEscrow { .. } => "withdraw_escrow",
            Command::DeactivateApp { .. } => "deactivate_app",
            Command::SubmitFeedback { .. } => "submit_feedback",
            Command::UpdateSettings { .. } => "update_settings",
            Command::ClaimOwnerRewards { .. } => "claim_owner_rewards",
            Command::WithdrawProtocolFees { .. } => "withdraw_protocol_fees",
        }
    }
}

/// Journaled command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequence number (starts at 1, no gaps)
    pub sequence: u64,

    /// Commit time; replay reuses it so timestamps are reproduced exactly
    pub timestamp: DateTime<Utc>,

    /// The command
    pub command: Command,

    /// Hash of the previous entry
    pub prev_hash: [u8; 32],

    /// Hash of this entry
    pub hash: [u8; 32],
}

impl JournalEntry {
    /// Build an entry chained onto `prev_hash`
    pub fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        command: Command,
        prev_hash: [u8; 32],
    ) -> Result<Self> {
        let hash = Self::compute_hash(sequence, &timestamp, &command, &prev_hash)?;
        Ok(Self {
            sequence,
            timestamp,
            command,
            prev_hash,
            hash,
        })
    }

    /// SHA-256 over sequence, timestamp, command and previous hash
    pub fn compute_hash(
        sequence: u64,
        timestamp: &DateTime<Utc>,
        command: &Command,
        prev_hash: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(sequence.to_be_bytes());
        hasher.update(timestamp.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        hasher.update(bincode::serialize(command)?);
        hasher.update(prev_hash);
        Ok(hasher.finalize().into())
    }

    /// Check this entry's own hash and its link to the previous entry
    pub fn verify(&self, expected_sequence: u64, expected_prev: &[u8; 32]) -> Result<()> {
        if self.sequence != expected_sequence {
            return Err(Error::JournalCorrupted(format!(
                "expected sequence {}, found {}",
                expected_sequence, self.sequence
            )));
        }
        if &self.prev_hash != expected_prev {
            return Err(Error::JournalCorrupted(format!(
                "entry {} does not link to {}",
                self.sequence,
                hex::encode(expected_prev)
            )));
        }
        let recomputed =
            Self::compute_hash(self.sequence, &self.timestamp, &self.command, &self.prev_hash)?;
        if recomputed != self.hash {
            return Err(Error::JournalCorrupted(format!(
                "entry {} hash mismatch: stored {}, computed {}",
                self.sequence,
                hex::encode(self.hash),
                hex::encode(recomputed)
            )));
        }
        Ok(())
    }
}

/// Last committed position of the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalHead {
    /// Last sequence (0 when empty)
    pub sequence: u64,
    /// Hash of the last entry
    pub hash: [u8; 32],
}

impl Default for JournalHead {
    fn default() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH,
        }
    }
}

impl JournalHead {
    /// Head after appending `entry`
    pub fn advance(&self, entry: &JournalEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.hash,
        }
    }
}

/// Storage wrapper for RocksDB
#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create the journal database
    pub fn open(config: &JournalConfig) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_JOURNAL, Self::cf_options_journal()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_OUTBOX, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened journal");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_journal() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Append an entry, queue its outbound transfer and move the head (atomic)
    pub fn append(&self, entry: &JournalEntry, transfer: Option<&Transfer>) -> Result<()> {
        let cf_journal = self.cf_handle(CF_JOURNAL)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_journal, entry.sequence.to_be_bytes(), bincode::serialize(entry)?);
        batch.put_cf(
            cf_meta,
            KEY_HEAD,
            bincode::serialize(&JournalHead::default().advance(entry))?,
        );
        if let Some(transfer) = transfer {
            let cf_outbox = self.cf_handle(CF_OUTBOX)?;
            batch.put_cf(cf_outbox, transfer.transfer_id.as_bytes(), bincode::serialize(transfer)?);
        }
        self.db.write(batch)?;

        tracing::debug!(
            sequence = entry.sequence,
            command = entry.command.name(),
            transfer = transfer.is_some(),
            "Journal entry appended"
        );

        Ok(())
    }

    /// Remove the newest entry and its transfer, restoring the previous head (atomic)
    pub fn revert(&self, entry: &JournalEntry, transfer: Option<&Transfer>) -> Result<()> {
        let head = self.head()?;
        if head.sequence != entry.sequence {
            return Err(Error::Storage(format!(
                "cannot revert entry {}: head is {}",
                entry.sequence, head.sequence
            )));
        }

        let cf_journal = self.cf_handle(CF_JOURNAL)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let previous = JournalHead {
            sequence: entry.sequence - 1,
            hash: entry.prev_hash,
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_journal, entry.sequence.to_be_bytes());
        batch.put_cf(cf_meta, KEY_HEAD, bincode::serialize(&previous)?);
        if let Some(transfer) = transfer {
            batch.delete_cf(self.cf_handle(CF_OUTBOX)?, transfer.transfer_id.as_bytes());
        }
        self.db.write(batch)?;

        tracing::debug!(sequence = entry.sequence, "Journal entry reverted");

        Ok(())
    }

    /// Current head
    pub fn head(&self) -> Result<JournalHead> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, KEY_HEAD)? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(JournalHead::default()),
        }
    }

    /// Settings the journal was created with
    pub fn genesis(&self) -> Result<Option<ProtocolSettings>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, KEY_GENESIS)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Record genesis settings; refuses to overwrite existing ones
    pub fn put_genesis(&self, settings: &ProtocolSettings) -> Result<()> {
        if self.genesis()?.is_some() {
            return Err(Error::Storage("genesis settings already recorded".to_string()));
        }
        let cf = self.cf_handle(CF_META)?;
        self.db.put_cf(cf, KEY_GENESIS, bincode::serialize(settings)?)?;
        Ok(())
    }

    /// Transfers not yet acknowledged, oldest first
    pub fn pending_transfers(&self) -> Result<Vec<Transfer>> {
        let cf = self.cf_handle(CF_OUTBOX)?;

        let mut transfers = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            transfers.push(bincode::deserialize(&value)?);
        }

        Ok(transfers)
    }

    /// Acknowledge delivered transfers (atomic)
    pub fn remove_transfers(&self, transfers: &[Transfer]) -> Result<()> {
        if transfers.is_empty() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_OUTBOX)?;

        let mut batch = WriteBatch::default();
        for transfer in transfers {
            batch.delete_cf(cf, transfer.transfer_id.as_bytes());
        }
        self.db.write(batch)?;

        tracing::debug!(count = transfers.len(), "Transfers acknowledged");
        Ok(())
    }

    /// Every entry in sequence order
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let cf = self.cf_handle(CF_JOURNAL)?;

        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Journal closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::TransferKind;
    use tempfile::TempDir;

    fn test_config() -> (JournalConfig, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = JournalConfig {
            enabled: true,
            data_dir: temp_dir.path().to_path_buf(),
        };
        (config, temp_dir)
    }

    fn command(n: u64) -> Command {
        Command::AddEscrow {
            app_id: AppId::new(1),
            caller: Principal::new("0xowner"),
            amount: Amount::from_units(n),
        }
    }

    fn chain(len: u64) -> Vec<JournalEntry> {
        let mut head = JournalHead::default();
        let mut entries = Vec::new();
        for seq in 1..=len {
            let entry = JournalEntry::new(seq, Utc::now(), command(seq), head.hash).unwrap();
            head = head.advance(&entry);
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_append_and_read_back() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        for entry in chain(3) {
            storage.append(&entry, None).unwrap();
        }

        let entries = storage.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].sequence, 3);
        assert_eq!(storage.head().unwrap().sequence, 3);
        assert_eq!(storage.head().unwrap().hash, entries[2].hash);
    }

    #[test]
    fn test_revert_restores_previous_head() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let entries = chain(2);

        storage.append(&entries[0], None).unwrap();
        storage.append(&entries[1], None).unwrap();
        storage.revert(&entries[1], None).unwrap();

        assert_eq!(storage.entries().unwrap().len(), 1);
        let head = storage.head().unwrap();
        assert_eq!(head.sequence, 1);
        assert_eq!(head.hash, entries[0].hash);

        // Only the newest entry may be reverted
        assert!(storage.revert(&entries[1], None).is_err());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let entries = chain(2);
        assert!(entries[0].verify(1, &GENESIS_HASH).is_ok());
        assert!(entries[1].verify(2, &entries[0].hash).is_ok());

        let mut tampered = entries[1].clone();
        tampered.command = command(1_000);
        assert!(matches!(
            tampered.verify(2, &entries[0].hash),
            Err(Error::JournalCorrupted(_))
        ));
        assert!(matches!(
            entries[1].verify(2, &GENESIS_HASH),
            Err(Error::JournalCorrupted(_))
        ));
        assert!(matches!(
            entries[1].verify(3, &entries[0].hash),
            Err(Error::JournalCorrupted(_))
        ));
    }

    #[test]
    fn test_genesis_written_once() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.genesis().unwrap().is_none());

        let settings = ProtocolSettings::default();
        storage.put_genesis(&settings).unwrap();
        assert_eq!(storage.genesis().unwrap(), Some(settings.clone()));
        assert!(storage.put_genesis(&settings).is_err());
    }

    fn transfer(units: u64) -> Transfer {
        Transfer::new(
            TransferKind::ReviewerReward,
            Principal::new("0xreviewer"),
            Amount::from_units(units),
            Some(AppId::new(1)),
        )
    }

    #[test]
    fn test_transfer_queued_with_entry() {
        let (config, _temp) = test_config();
        let entries = chain(2);
        let first = transfer(75);
        let second = transfer(30);
        {
            let storage = Storage::open(&config).unwrap();
            storage.append(&entries[0], Some(&first)).unwrap();
            storage.append(&entries[1], Some(&second)).unwrap();

            // Reverting the entry drops its transfer too.
            storage.revert(&entries[1], Some(&second)).unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.pending_transfers().unwrap(), vec![first.clone()]);

        storage.remove_transfers(&[first]).unwrap();
        assert!(storage.pending_transfers().unwrap().is_empty());
        assert_eq!(storage.head().unwrap().sequence, 1);
    }

    #[test]
    fn test_empty_journal_head() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.head().unwrap(), JournalHead::default());
        assert!(storage.entries().unwrap().is_empty());
    }
}
