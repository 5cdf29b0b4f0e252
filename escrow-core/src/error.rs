//! Error types for the escrow ledger

use crate::types::{Amount, AppId, FeedbackId, Principal};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// App name is empty
    #[error("App name must not be empty")]
    EmptyName,

    /// Rating outside 1..=5
    #[error("Invalid rating {0}: must be between 1 and 5")]
    InvalidRating(u8),

    /// Feedback comment is empty after trimming
    #[error("Feedback comment must not be empty")]
    EmptyComment,

    /// Owner and protocol percentages exceed 100
    #[error("Invalid percentages: owner {owner}% + protocol {protocol}% exceeds 100%")]
    InvalidPercentages {
        /// App owner share
        owner: u8,
        /// Protocol share
        protocol: u8,
    },

    /// Minimum reward above maximum reward
    #[error("Invalid reward bounds: min {min} > max {max}")]
    InvalidRewardBounds {
        /// Configured minimum
        min: Amount,
        /// Configured maximum
        max: Amount,
    },

    /// Zero-valued deposit
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    /// Caller is not allowed to perform the action
    #[error("Unauthorized: {caller} may not {action}")]
    Unauthorized {
        /// Calling principal
        caller: Principal,
        /// Attempted action
        action: &'static str,
    },

    /// App does not exist
    #[error("App not found: {0}")]
    AppNotFound(AppId),

    /// App is deactivated
    #[error("App is inactive: {0}")]
    AppInactive(AppId),

    /// Reviewer already submitted feedback for this app
    #[error("Duplicate feedback: {reviewer} already reviewed app {app_id}")]
    DuplicateFeedback {
        /// Reviewed app
        app_id: AppId,
        /// Reviewer
        reviewer: Principal,
    },

    /// Feedback does not exist
    #[error("Feedback not found: {0}")]
    FeedbackNotFound(FeedbackId),

    /// Registration payment below the fee
    #[error("Insufficient registration fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Current registration fee
        required: Amount,
        /// Payment supplied
        provided: Amount,
    },

    /// Escrow cannot cover the base reward
    #[error("Insufficient escrow: required {required}, available {available}")]
    InsufficientEscrow {
        /// Base reward to debit
        required: Amount,
        /// Current escrow balance
        available: Amount,
    },

    /// Balance to pay out is zero
    #[error("Nothing to claim")]
    NothingToClaim,

    /// Outbound transfer failed; ledger state unchanged
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Invariant violation (percentages, negative escrow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Journal hash chain or sequence broken
    #[error("Journal corrupted: {0}")]
    JournalCorrupted(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-correctable input problem
    Validation,
    /// Caller lacks the right to act
    Authorization,
    /// Caller's view of the ledger is stale
    State,
    /// Funds are missing; top up and retry
    Resource,
    /// Ledger corruption
    InvariantViolation,
    /// Storage, actor or configuration plumbing
    Infrastructure,
}

impl ErrorKind {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::Resource => "resource",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyName
            | Error::InvalidRating(_)
            | Error::EmptyComment
            | Error::InvalidPercentages { .. }
            | Error::InvalidRewardBounds { .. }
            | Error::ZeroAmount => ErrorKind::Validation,
            Error::Unauthorized { .. } => ErrorKind::Authorization,
            Error::AppNotFound(_)
            | Error::AppInactive(_)
            | Error::DuplicateFeedback { .. }
            | Error::FeedbackNotFound(_) => ErrorKind::State,
            Error::InsufficientFee { .. }
            | Error::InsufficientEscrow { .. }
            | Error::NothingToClaim => ErrorKind::Resource,
            Error::InvariantViolation(_) | Error::JournalCorrupted(_) => {
                ErrorKind::InvariantViolation
            }
            Error::TransferFailed(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// The core never retries; only plumbing failures may succeed on a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransferFailed(_) | Error::Storage(_) | Error::Io(_) | Error::Concurrency(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
