//! Payout engine: reward split, escrow debit and outbound transfers
//!
//! A payout is always executed in two steps under the ledger's writer lock:
//!
//! 1. [`PayoutEngine::plan`] checks escrow and computes the split without
//!    touching any state.
//! 2. [`PayoutEngine::apply`] debits escrow and credits the reviewer, the app
//!    owner and the protocol treasury.
//!
//! The reviewer transfer is handed to the [`PayoutSink`] between the two
//! steps, so a failed transfer leaves escrow untouched.

use crate::{
    apps::AppLedger,
    balances::RewardBalanceStore,
    settings::ProtocolSettings,
    storage::Storage,
    types::{Amount, AppId, Principal, RewardSource},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Three-way split of a base reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    /// Base reward debited from escrow
    pub base: Amount,
    /// Reviewer share (the remainder)
    pub reviewer: Amount,
    /// App owner share
    pub owner: Amount,
    /// Protocol treasury share
    pub protocol: Amount,
}

impl RewardSplit {
    /// Split `base` by the configured percentages.
    ///
    /// Owner and protocol shares are taken from the base independently and
    /// rounded down; the reviewer gets the remainder, so the shares always sum
    /// to `base` exactly.
    pub fn compute(base: Amount, settings: &ProtocolSettings) -> Result<Self> {
        if let Err(e) = settings.validate() {
            tracing::error!(error = %e, "Payout attempted with invalid settings");
            return Err(Error::InvariantViolation(format!(
                "payout with invalid settings: {}",
                e
            )));
        }

        let owner = base.mul_percent(settings.app_owner_reward_percentage);
        let protocol = base.mul_percent(settings.protocol_fee_percentage);
        let reviewer = base
            .checked_sub(owner)
            .and_then(|rest| rest.checked_sub(protocol))
            .ok_or_else(|| {
                Error::InvariantViolation(format!("shares exceed base reward {}", base))
            })?;

        Ok(Self {
            base,
            reviewer,
            owner,
            protocol,
        })
    }
}

/// Payout ready to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    /// App whose escrow pays
    pub app_id: AppId,
    /// App owner credited with the owner share
    pub owner: Principal,
    /// Split of the base reward
    pub split: RewardSplit,
}

/// Why money leaves the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    /// Reviewer share of a feedback reward
    ReviewerReward,
    /// Owner withdrawing an app's escrow
    EscrowWithdrawal,
    /// Owner claiming accrued owner shares
    OwnerRewardClaim,
    /// Administrator withdrawing the protocol treasury
    ProtocolFeeWithdrawal,
}

impl TransferKind {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::ReviewerReward => "reviewer_reward",
            TransferKind::EscrowWithdrawal => "escrow_withdrawal",
            TransferKind::OwnerRewardClaim => "owner_reward_claim",
            TransferKind::ProtocolFeeWithdrawal => "protocol_fee_withdrawal",
        }
    }
}

/// Outbound transfer instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID (UUIDv7 for time-ordering)
    pub transfer_id: Uuid,
    /// Reason
    pub kind: TransferKind,
    /// Beneficiary
    pub recipient: Principal,
    /// Amount leaving the ledger
    pub amount: Amount,
    /// Funding app, if any
    pub app_id: Option<AppId>,
}

impl Transfer {
    /// New transfer instruction
    pub fn new(kind: TransferKind, recipient: Principal, amount: Amount, app_id: Option<AppId>) -> Self {
        Self {
            transfer_id: Uuid::now_v7(),
            kind,
            recipient,
            amount,
            app_id,
        }
    }
}

/// Delivers money leaving the ledger.
///
/// Called with the writer lock held; implementations must be local and
/// bounded (queue the instruction, do not wait on the network).
pub trait PayoutSink: Send + Sync {
    /// Deliver or durably queue a transfer. An error aborts the operation.
    fn transfer(&self, transfer: &Transfer) -> Result<()>;
}

/// Default sink: queues transfers for an external settlement process.
///
/// With a journal, queued transfers are persisted in the same write as the
/// command that produced them and stay there until drained, so a restart
/// reloads whatever had not been handed on yet.
#[derive(Debug, Default)]
pub struct TransferOutbox {
    queue: Mutex<Vec<Transfer>>,
    store: Option<Storage>,
}

impl TransferOutbox {
    /// Empty in-memory outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbox backed by the journal, preloaded with unacknowledged transfers
    pub(crate) fn durable(store: Storage) -> Result<Self> {
        let pending = store.pending_transfers()?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Reloaded pending transfers");
        }
        Ok(Self {
            queue: Mutex::new(pending),
            store: Some(store),
        })
    }

    /// Take every queued transfer, acknowledging them in the journal
    pub fn drain(&self) -> Result<Vec<Transfer>> {
        let mut queue = self.queue.lock();
        if let Some(store) = &self.store {
            store.remove_transfers(&queue)?;
        }
        Ok(std::mem::take(&mut *queue))
    }

    /// Snapshot of queued transfers
    pub fn pending(&self) -> Vec<Transfer> {
        self.queue.lock().clone()
    }

    /// Number of queued transfers
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl PayoutSink for TransferOutbox {
    fn transfer(&self, transfer: &Transfer) -> Result<()> {
        self.queue.lock().push(transfer.clone());
        Ok(())
    }
}

/// Owner claimable balances and the protocol treasury
#[derive(Debug, Clone, Default)]
pub struct PayoutEngine {
    owner_claimable: HashMap<Principal, Amount>,
    treasury: Amount,
}

impl PayoutEngine {
    /// Empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Check escrow and compute the split; mutates nothing
    pub fn plan(
        &self,
        apps: &AppLedger,
        app_id: AppId,
        base: Amount,
        settings: &ProtocolSettings,
    ) -> Result<PayoutPlan> {
        let app = apps.get(app_id)?;
        if app.escrow_amount < base {
            return Err(Error::InsufficientEscrow {
                required: base,
                available: app.escrow_amount,
            });
        }

        let split = RewardSplit::compute(base, settings)?;
        Ok(PayoutPlan {
            app_id,
            owner: app.owner.clone(),
            split,
        })
    }

    /// Debit escrow and credit every party
    pub(crate) fn apply(
        &mut self,
        apps: &mut AppLedger,
        balances: &mut RewardBalanceStore,
        plan: &PayoutPlan,
        reviewer: &Principal,
        now: DateTime<Utc>,
    ) -> Result<RewardSplit> {
        let split = plan.split;
        apps.debit_escrow(plan.app_id, split.base)?;

        balances.credit(reviewer, RewardSource::App(plan.app_id), split.reviewer, now);

        let claimable = self.owner_claimable.entry(plan.owner.clone()).or_default();
        *claimable = claimable.saturating_add(split.owner);
        self.treasury = self.treasury.saturating_add(split.protocol);

        Ok(split)
    }

    /// Plan and apply in one step (no outbound transfer)
    #[allow(clippy::too_many_arguments)]
    pub fn disburse(
        &mut self,
        apps: &mut AppLedger,
        balances: &mut RewardBalanceStore,
        app_id: AppId,
        reviewer: &Principal,
        base: Amount,
        settings: &ProtocolSettings,
        now: DateTime<Utc>,
    ) -> Result<RewardSplit> {
        let plan = self.plan(apps, app_id, base, settings)?;
        self.apply(apps, balances, &plan, reviewer, now)
    }

    /// Owner shares waiting to be claimed
    pub fn owner_claimable(&self, owner: &Principal) -> Amount {
        self.owner_claimable.get(owner).copied().unwrap_or(Amount::ZERO)
    }

    /// Validate an owner claim and return the amount
    pub fn check_owner_claim(&self, owner: &Principal) -> Result<Amount> {
        let amount = self.owner_claimable(owner);
        if amount.is_zero() {
            return Err(Error::NothingToClaim);
        }
        Ok(amount)
    }

    pub(crate) fn clear_owner_claim(&mut self, owner: &Principal) -> Amount {
        self.owner_claimable.remove(owner).unwrap_or(Amount::ZERO)
    }

    /// Protocol treasury balance
    pub fn treasury(&self) -> Amount {
        self.treasury
    }

    /// Validate a treasury withdrawal and return the amount
    pub fn check_treasury_withdrawal(&self) -> Result<Amount> {
        if self.treasury.is_zero() {
            return Err(Error::NothingToClaim);
        }
        Ok(self.treasury)
    }

    pub(crate) fn clear_treasury(&mut self) -> Amount {
        std::mem::take(&mut self.treasury)
    }

    /// Sum of owner claimable balances
    pub fn total_owner_claimable(&self) -> Amount {
        self.owner_claimable
            .values()
            .fold(Amount::ZERO, |acc, a| acc.saturating_add(*a))
    }
}
