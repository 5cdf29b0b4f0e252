//! Core types for the escrow ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact integer arithmetic for money (no floating point)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Base units per whole native unit (18 decimal places)
pub const BASE_UNITS_PER_UNIT: u128 = 1_000_000_000_000_000_000;

/// Number of fractional digits carried by [`Amount`]
pub const AMOUNT_DECIMALS: u32 = 18;

/// Monetary amount in base units (10^-18 of a native unit)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u128);

/// Failure to parse a decimal amount string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    /// Not a decimal number
    #[error("not a decimal number: {0}")]
    Malformed(String),
    /// Negative values are not amounts
    #[error("amount must not be negative")]
    Negative,
    /// More than 18 fractional digits
    #[error("at most 18 fractional digits are supported")]
    TooPrecise,
    /// Does not fit in 128 bits of base units
    #[error("amount overflows")]
    Overflow,
}

impl Amount {
    /// Zero
    pub const ZERO: Amount = Amount(0);

    /// From raw base units
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// From whole native units
    pub const fn from_units(units: u64) -> Self {
        Self(units as u128 * BASE_UNITS_PER_UNIT)
    }

    /// Parse a decimal string in native units, e.g. `"0.11"`
    pub fn parse_decimal(s: &str) -> std::result::Result<Self, ParseAmountError> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| ParseAmountError::Malformed(e.to_string()))?;

        if value.is_sign_negative() && !value.is_zero() {
            return Err(ParseAmountError::Negative);
        }

        let value = value.normalize();
        let scale = value.scale();
        if scale > AMOUNT_DECIMALS {
            return Err(ParseAmountError::TooPrecise);
        }

        let mantissa = value.mantissa().unsigned_abs();
        mantissa
            .checked_mul(10u128.pow(AMOUNT_DECIMALS - scale))
            .map(Amount)
            .ok_or(ParseAmountError::Overflow)
    }

    /// Raw base units
    pub const fn base_units(&self) -> u128 {
        self.0
    }

    /// Is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Checked subtraction (`None` when the result would be negative)
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Saturating addition, for monotone statistics only
    pub fn saturating_add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }

    /// `floor(self * num / den)` without intermediate overflow.
    ///
    /// Requires `num <= den` and `den > 0`.
    pub fn mul_ratio(self, num: u128, den: u128) -> Amount {
        debug_assert!(den > 0 && num <= den);
        let whole = (self.0 / den) * num;
        let rest = (self.0 % den) * num / den;
        Amount(whole + rest)
    }

    /// `floor(self * pct / 100)`
    pub fn mul_percent(self, pct: u8) -> Amount {
        self.mul_ratio(u128::from(pct.min(100)), 100)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / BASE_UNITS_PER_UNIT;
        let frac = self.0 % BASE_UNITS_PER_UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:018}", frac);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

/// App identifier (sequential, starting at 1)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AppId(u64);

impl AppId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Feedback identifier (sequential, starting at 1)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeedbackId(u64);

impl FeedbackId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Already-authenticated identity (wallet address, account, etc.)
///
/// The ledger only compares principals for equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Create new principal
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller role for governance operations, established by the caller's auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Protocol administrator
    Administrator,
    /// Any other participant
    Participant,
}

/// Registered app with its escrow and rating aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// App ID
    pub app_id: AppId,

    /// Owner identity
    pub owner: Principal,

    /// Display name
    pub name: String,

    /// Description
    pub description: String,

    /// Home page URL
    pub home_url: String,

    /// Mini-app URL
    pub miniapp_url: String,

    /// Icon URL
    pub icon_url: String,

    /// Funds earmarked for reviewer rewards
    pub escrow_amount: Amount,

    /// False once deactivated (terminal)
    pub is_active: bool,

    /// Number of feedback records for this app
    pub total_ratings: u64,

    /// Sum of all ratings
    pub rating_sum: u64,

    /// Average rating in tenths, rounded half-up (45 == 4.5)
    pub average_rating_tenths: u32,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl App {
    /// Average rating with one decimal place
    pub fn average_rating(&self) -> Decimal {
        Decimal::new(i64::from(self.average_rating_tenths), 1)
    }
}

/// Immutable feedback record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Feedback ID
    pub feedback_id: FeedbackId,

    /// Reviewed app
    pub app_id: AppId,

    /// Reviewer identity
    pub reviewer: Principal,

    /// Rating in 1..=5
    pub rating: u8,

    /// Non-empty comment
    pub comment: String,

    /// Reviewer share actually paid
    pub reward_amount: Amount,

    /// App owner share
    pub owner_reward: Amount,

    /// Protocol share
    pub protocol_reward: Amount,

    /// Submission timestamp
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Base reward this feedback debited from escrow
    pub fn base_reward(&self) -> Amount {
        self.reward_amount
            .saturating_add(self.owner_reward)
            .saturating_add(self.protocol_reward)
    }
}

/// Entity on whose behalf a reward balance accrues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RewardSource {
    /// Rewards funded by a specific app's escrow
    App(AppId),
    /// Protocol-wide rewards
    Protocol,
}

impl fmt::Display for RewardSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardSource::App(id) => write!(f, "app:{}", id),
            RewardSource::Protocol => write!(f, "protocol"),
        }
    }
}

/// Per-reviewer, per-source reward balance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBalance {
    /// Currently withdrawable
    pub balance: Amount,

    /// Lifetime earnings (never decreases)
    pub total_earned: Amount,

    /// Last credit, `None` for a reviewer who never earned from this source
    pub last_updated: Option<DateTime<Utc>>,
}
