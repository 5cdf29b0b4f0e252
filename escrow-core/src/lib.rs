//! Feedback escrow ledger
//!
//! App owners lock funds in escrow; reviewers who rate an app are paid out of
//! that escrow, with fixed shares going to the app owner and the protocol.
//!
//! # Architecture
//!
//! - **Single Writer**: every mutation runs under one writer lock, optionally
//!   fed by an async actor mailbox
//! - **Two-Phase Payouts**: validate, reserve, transfer, then commit
//! - **Command Journal**: hash-chained RocksDB log replayed on startup
//! - **Events**: broadcast after commit for external dispatchers
//!
//! # Invariants
//!
//! - Money conservation: escrow == deposits - withdrawals - reward debits
//! - Exact split: reviewer + owner + protocol == base reward
//! - One feedback per (app, reviewer)
//! - Deterministic replay: same journal → same state

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod apps;
pub mod balances;
pub mod config;
pub mod error;
pub mod events;
pub mod feedback;
pub mod ledger;
pub mod metrics;
pub mod payout;
pub mod reward;
pub mod settings;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{spawn_ledger_actor, spawn_outbox_drainer, LedgerHandle};
pub use apps::AppRegistration;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use events::{EventKind, LedgerEvent};
pub use ledger::{FeedbackReceipt, Ledger, LedgerTotals, Outcome};
pub use payout::{PayoutSink, RewardSplit, Transfer, TransferKind, TransferOutbox};
pub use reward::calculate_base_reward;
pub use settings::ProtocolSettings;
pub use storage::Command;
pub use types::{
    Amount, App, AppId, Feedback, FeedbackId, Principal, RewardBalance, RewardSource, Role,
};
