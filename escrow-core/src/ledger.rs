//! Main ledger orchestration layer
//!
//! This module ties the app, feedback, payout and balance components together
//! behind one writer lock, so every mutating operation is serializable and
//! all-or-nothing. Each mutation runs as:
//!
//! 1. validate and plan without touching state
//! 2. reserve a journal record (when the journal is enabled)
//! 3. hand any outbound transfer to the [`PayoutSink`]
//! 4. commit in memory and publish events
//!
//! A failure in step 3 reverts the journal record and leaves state unchanged.
//! The journal record and its transfer are written together, and the transfer
//! stays queued in the journal until it is drained or the sink accepts it. If
//! a journal record cannot be reverted the ledger stops accepting commands;
//! reopening replays the record and reloads its transfer.
//!
//! # Example
//!
//! ```no_run
//! use escrow_core::{Amount, AppRegistration, Config, Ledger, Principal};
//!
//! fn main() -> escrow_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let owner = Principal::new("0xowner");
//!     let app_id = ledger.register_app(
//!         &owner,
//!         AppRegistration::named("Frames"),
//!         Amount::from_units(150),
//!     )?;
//!
//!     let receipt = ledger.submit_feedback(app_id, &Principal::new("0xreviewer"), 5, "Great app")?;
//!     assert_eq!(receipt.split.reviewer, Amount::from_units(75));
//!
//!     Ok(())
//! }
//! ```

use crate::{
    apps::{AppLedger, AppRegistration},
    balances::RewardBalanceStore,
    config::{Config, SettingsConfig},
    error::ErrorKind,
    events::{EventBus, EventKind, LedgerEvent},
    feedback::{FeedbackLedger, PaidShares},
    metrics::Metrics,
    payout::{PayoutEngine, PayoutSink, RewardSplit, Transfer, TransferKind, TransferOutbox},
    reward::calculate_base_reward,
    settings::{ProtocolSettings, SettingsRegistry},
    storage::{Command, JournalEntry, JournalHead, Storage},
    types::{Amount, App, AppId, Feedback, FeedbackId, Principal, RewardBalance, RewardSource, Role},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Result of a committed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// New app ID
    AppRegistered(AppId),
    /// Escrow after the top-up
    EscrowAdded(Amount),
    /// Amount released to the owner
    EscrowWithdrawn(Amount),
    /// App is now inactive
    AppDeactivated(AppId),
    /// Feedback stored and paid
    FeedbackSubmitted(FeedbackReceipt),
    /// New settings version
    SettingsUpdated(u64),
    /// Amount paid to the owner
    OwnerRewardsClaimed(Amount),
    /// Amount paid out of the treasury
    ProtocolFeesWithdrawn(Amount),
}

/// What a successful feedback submission paid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackReceipt {
    /// New feedback ID
    pub feedback_id: FeedbackId,
    /// Reviewed app
    pub app_id: AppId,
    /// How the base reward was split
    pub split: RewardSplit,
}

/// Running money totals, used to check conservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    /// Registration payments plus top-ups
    pub deposited: Amount,
    /// Escrow released to owners
    pub escrow_withdrawn: Amount,
    /// Base rewards debited from escrow
    pub rewards_debited: Amount,
    /// Reviewer shares paid
    pub reviewer_paid: Amount,
    /// Owner shares accrued
    pub owner_accrued: Amount,
    /// Protocol shares accrued
    pub protocol_accrued: Amount,
    /// Owner shares claimed
    pub owner_claimed: Amount,
    /// Treasury paid out
    pub fees_withdrawn: Amount,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    apps: AppLedger,
    feedback: FeedbackLedger,
    balances: RewardBalanceStore,
    payouts: PayoutEngine,
    totals: LedgerTotals,
    journal_head: JournalHead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    Replay,
}

/// Journal record written for a command that is still being applied
#[derive(Debug)]
struct Staged {
    entry: JournalEntry,
    transfer: Option<Transfer>,
}

/// Main ledger interface
pub struct Ledger {
    /// Everything guarded by the single writer lock
    state: RwLock<LedgerState>,

    /// Versioned protocol settings
    settings: SettingsRegistry,

    /// Event broadcast
    events: EventBus,

    /// Where outbound transfers go
    sink: Arc<dyn PayoutSink>,

    /// Default sink, kept so callers can drain it
    outbox: Arc<TransferOutbox>,

    /// A sink other than `outbox` is installed
    external_sink: bool,

    /// Set when a journal record could not be reverted
    halted: AtomicBool,

    /// Durable journal (if enabled)
    storage: Option<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Ledger")
            .field("apps", &state.apps.len())
            .field("feedback", &state.feedback.len())
            .field("journal_head", &state.journal_head.sequence)
            .field("settings_version", &self.settings.version())
            .field("storage", &self.storage)
            .finish()
    }
}

impl Ledger {
    /// Open ledger with configuration, replaying the journal if enabled
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let configured = config.settings.to_settings()?;

        let storage = if config.journal.enabled {
            Some(Storage::open(&config.journal)?)
        } else {
            None
        };

        let initial = match &storage {
            Some(storage) => Self::genesis_settings(storage, configured)?,
            None => configured,
        };

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;
        let outbox = Arc::new(match &storage {
            Some(storage) => TransferOutbox::durable(storage.clone())?,
            None => TransferOutbox::new(),
        });

        let ledger = Self {
            state: RwLock::new(LedgerState::default()),
            settings: SettingsRegistry::new(initial)?,
            events: EventBus::new(config.events.channel_capacity),
            sink: outbox.clone(),
            outbox,
            external_sink: false,
            halted: AtomicBool::new(false),
            storage,
            metrics,
            config,
        };
        ledger.replay()?;

        info!(
            service = %ledger.config.service_name,
            journal = ledger.storage.is_some(),
            apps = ledger.app_count(),
            "Ledger opened"
        );
        Ok(ledger)
    }

    /// In-memory ledger starting from `settings`
    pub fn in_memory(settings: ProtocolSettings) -> Result<Self> {
        let mut config = Config::default();
        config.settings = SettingsConfig::from(&settings);
        Self::open(config)
    }

    /// Route outbound transfers to `sink` instead of the built-in outbox.
    ///
    /// Transfers reloaded from the journal at open stay in the built-in outbox.
    pub fn with_sink(mut self, sink: Arc<dyn PayoutSink>) -> Self {
        self.sink = sink;
        self.external_sink = true;
        self
    }

    fn genesis_settings(storage: &Storage, configured: ProtocolSettings) -> Result<ProtocolSettings> {
        match storage.genesis()? {
            Some(recorded) => {
                if recorded != configured {
                    warn!("Configured settings differ from the journal's genesis; using the journal");
                }
                Ok(recorded)
            }
            None => {
                let head = storage.head()?;
                if head.sequence > 0 {
                    return Err(Error::JournalCorrupted(format!(
                        "journal holds {} entries but no genesis settings",
                        head.sequence
                    )));
                }
                storage.put_genesis(&configured)?;
                Ok(configured)
            }
        }
    }

    fn replay(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let entries = storage.entries()?;
        let mut state = self.state.write();
        let mut head = JournalHead::default();

        for entry in entries {
            entry.verify(head.sequence + 1, &head.hash)?;

            let name = entry.command.name();
            self.apply(&mut state, entry.command.clone(), entry.timestamp, Mode::Replay)
                .map_err(|e| {
                    error!(sequence = entry.sequence, command = name, error = %e, "Journal entry failed to replay");
                    Error::JournalCorrupted(format!(
                        "entry {} ({}) failed to replay: {}",
                        entry.sequence, name, e
                    ))
                })?;

            head = head.advance(&entry);
        }

        let stored = storage.head()?;
        if stored != head {
            error!(stored = stored.sequence, replayed = head.sequence, "Journal head mismatch");
            return Err(Error::JournalCorrupted(format!(
                "head records sequence {} but {} entries replayed",
                stored.sequence, head.sequence
            )));
        }

        state.journal_head = head;
        self.events.resume_after(head.sequence);
        self.metrics.set_active_apps(state.apps.active_count());

        if head.sequence > 0 {
            info!(entries = head.sequence, apps = state.apps.len(), "Journal replayed");
        }
        Ok(())
    }

    // Mutating operations

    /// Register an app; the whole payment becomes its initial escrow
    pub fn register_app(
        &self,
        owner: &Principal,
        registration: AppRegistration,
        payment: Amount,
    ) -> Result<AppId> {
        match self.execute(Command::RegisterApp {
            owner: owner.clone(),
            registration,
            payment,
        })? {
            Outcome::AppRegistered(app_id) => Ok(app_id),
            other => Err(unexpected(other)),
        }
    }

    /// Top up escrow; returns the new escrow amount
    pub fn add_escrow(&self, app_id: AppId, caller: &Principal, amount: Amount) -> Result<Amount> {
        match self.execute(Command::AddEscrow {
            app_id,
            caller: caller.clone(),
            amount,
        })? {
            Outcome::EscrowAdded(escrow) => Ok(escrow),
            other => Err(unexpected(other)),
        }
    }

    /// Transfer the whole escrow to the owner; returns the amount released
    pub fn withdraw_escrow(&self, app_id: AppId, caller: &Principal) -> Result<Amount> {
        match self.execute(Command::WithdrawEscrow {
            app_id,
            caller: caller.clone(),
        })? {
            Outcome::EscrowWithdrawn(amount) => Ok(amount),
            other => Err(unexpected(other)),
        }
    }

    /// Stop accepting feedback for an app (terminal)
    pub fn deactivate_app(&self, app_id: AppId, caller: &Principal) -> Result<()> {
        match self.execute(Command::DeactivateApp {
            app_id,
            caller: caller.clone(),
        })? {
            Outcome::AppDeactivated(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Submit rated feedback and pay its reward out of the app's escrow
    pub fn submit_feedback(
        &self,
        app_id: AppId,
        reviewer: &Principal,
        rating: u8,
        comment: impl Into<String>,
    ) -> Result<FeedbackReceipt> {
        match self.execute(Command::SubmitFeedback {
            app_id,
            reviewer: reviewer.clone(),
            rating,
            comment: comment.into(),
        })? {
            Outcome::FeedbackSubmitted(receipt) => Ok(receipt),
            other => Err(unexpected(other)),
        }
    }

    /// Replace protocol settings; returns the new version
    pub fn update_settings(
        &self,
        caller: &Principal,
        role: Role,
        settings: ProtocolSettings,
    ) -> Result<u64> {
        match self.execute(Command::UpdateSettings {
            caller: caller.clone(),
            role,
            settings,
        })? {
            Outcome::SettingsUpdated(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Pay out an owner's accrued shares across all their apps
    pub fn claim_owner_rewards(&self, owner: &Principal) -> Result<Amount> {
        match self.execute(Command::ClaimOwnerRewards {
            owner: owner.clone(),
        })? {
            Outcome::OwnerRewardsClaimed(amount) => Ok(amount),
            other => Err(unexpected(other)),
        }
    }

    /// Pay the protocol treasury out to `recipient` (administrator only)
    pub fn withdraw_protocol_fees(
        &self,
        caller: &Principal,
        role: Role,
        recipient: &Principal,
    ) -> Result<Amount> {
        match self.execute(Command::WithdrawProtocolFees {
            caller: caller.clone(),
            role,
            recipient: recipient.clone(),
        })? {
            Outcome::ProtocolFeesWithdrawn(amount) => Ok(amount),
            other => Err(unexpected(other)),
        }
    }

    /// Run one command under the writer lock
    pub fn execute(&self, command: Command) -> Result<Outcome> {
        let name = command.name();
        let mut state = self.state.write();
        if self.halted.load(Ordering::Acquire) {
            error!(command = name, "Ledger halted after a failed journal rollback");
            return Err(Error::Storage(
                "journal could not be rolled back; reopen the ledger to recover".to_string(),
            ));
        }
        let now = Utc::now();

        match self.apply(&mut state, command, now, Mode::Live) {
            Ok((outcome, events)) => {
                for kind in events {
                    self.events.publish(kind, now);
                }

                match &outcome {
                    Outcome::AppRegistered(_) => {
                        self.metrics.apps_registered.inc();
                        self.metrics.active_apps.inc();
                    }
                    Outcome::AppDeactivated(_) => self.metrics.active_apps.dec(),
                    Outcome::FeedbackSubmitted(_) => self.metrics.feedback_submitted.inc(),
                    _ => {}
                }

                info!(command = name, outcome = ?outcome, "Command committed");
                Ok(outcome)
            }
            Err(e) => {
                if e.kind() == ErrorKind::InvariantViolation {
                    error!(command = name, error = %e, "Invariant violation");
                } else {
                    warn!(command = name, kind = e.kind().as_str(), error = %e, "Command rejected");
                }
                self.metrics.record_rejection(e.kind());
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        command: Command,
        now: DateTime<Utc>,
        mode: Mode,
    ) -> Result<(Outcome, Vec<EventKind>)> {
        match &command {
            Command::RegisterApp {
                owner,
                registration,
                payment,
            } => {
                let settings = self.settings.get();
                AppLedger::check_registration(registration, *payment, &settings)?;

                let staged = self.stage(state, &command, now, mode, None)?;
                let app_id = self.settle(state, staged, |state| {
                    let app_id = state.apps.register(
                        owner.clone(),
                        registration.clone(),
                        *payment,
                        &settings,
                        now,
                    )?;
                    state.totals.deposited = state.totals.deposited.saturating_add(*payment);
                    Ok(app_id)
                })?;

                Ok((
                    Outcome::AppRegistered(app_id),
                    vec![EventKind::AppRegistered {
                        app_id,
                        owner: owner.clone(),
                        name: registration.name.clone(),
                        home_url: registration.home_url.clone(),
                        miniapp_url: registration.miniapp_url.clone(),
                        payment: *payment,
                    }],
                ))
            }

            Command::AddEscrow {
                app_id,
                caller,
                amount,
            } => {
                state.apps.check_add_escrow(*app_id, caller, *amount)?;

                let staged = self.stage(state, &command, now, mode, None)?;
                let escrow_amount = self.settle(state, staged, |state| {
                    let escrow = state.apps.add_escrow(*app_id, caller, *amount)?;
                    state.totals.deposited = state.totals.deposited.saturating_add(*amount);
                    Ok(escrow)
                })?;

                Ok((
                    Outcome::EscrowAdded(escrow_amount),
                    vec![EventKind::AppEscrowUpdated {
                        app_id: *app_id,
                        escrow_amount,
                    }],
                ))
            }

            Command::WithdrawEscrow { app_id, caller } => {
                let amount = state.apps.check_withdraw(*app_id, caller)?;

                let transfer =
                    Transfer::new(TransferKind::EscrowWithdrawal, caller.clone(), amount, Some(*app_id));
                let staged = self.stage(state, &command, now, mode, Some(&transfer))?;
                self.deliver(staged.as_ref(), transfer, mode)?;
                let released = self.settle(state, staged, |state| {
                    let released = state.apps.clear_escrow(*app_id)?;
                    state.totals.escrow_withdrawn =
                        state.totals.escrow_withdrawn.saturating_add(released);
                    Ok(released)
                })?;

                Ok((
                    Outcome::EscrowWithdrawn(released),
                    vec![EventKind::AppEscrowUpdated {
                        app_id: *app_id,
                        escrow_amount: Amount::ZERO,
                    }],
                ))
            }

            Command::DeactivateApp { app_id, caller } => {
                state.apps.check_deactivate(*app_id, caller)?;

                let staged = self.stage(state, &command, now, mode, None)?;
                self.settle(state, staged, |state| state.apps.deactivate(*app_id, caller))?;

                Ok((
                    Outcome::AppDeactivated(*app_id),
                    vec![EventKind::AppDeactivated {
                        app_id: *app_id,
                        owner: caller.clone(),
                    }],
                ))
            }

            Command::SubmitFeedback {
                app_id,
                reviewer,
                rating,
                comment,
            } => {
                let settings = self.settings.get();
                state
                    .feedback
                    .check_submission(&state.apps, *app_id, reviewer, *rating, comment)?;

                let base = calculate_base_reward(*rating, &settings);
                let plan = state.payouts.plan(&state.apps, *app_id, base, &settings)?;

                let transfer = Transfer::new(
                    TransferKind::ReviewerReward,
                    reviewer.clone(),
                    plan.split.reviewer,
                    Some(*app_id),
                );
                let staged = self.stage(state, &command, now, mode, Some(&transfer))?;
                self.deliver(staged.as_ref(), transfer, mode)?;
                let feedback_id = self.settle(state, staged, |state| {
                    let split =
                        state
                            .payouts
                            .apply(&mut state.apps, &mut state.balances, &plan, reviewer, now)?;
                    let feedback_id = state.feedback.insert(
                        *app_id,
                        reviewer.clone(),
                        *rating,
                        comment.clone(),
                        PaidShares {
                            reviewer: split.reviewer,
                            owner: split.owner,
                            protocol: split.protocol,
                        },
                        now,
                    )?;
                    state.apps.record_rating(*app_id, *rating)?;

                    let totals = &mut state.totals;
                    totals.rewards_debited = totals.rewards_debited.saturating_add(split.base);
                    totals.reviewer_paid = totals.reviewer_paid.saturating_add(split.reviewer);
                    totals.owner_accrued = totals.owner_accrued.saturating_add(split.owner);
                    totals.protocol_accrued = totals.protocol_accrued.saturating_add(split.protocol);
                    Ok(feedback_id)
                })?;

                Ok((
                    Outcome::FeedbackSubmitted(FeedbackReceipt {
                        feedback_id,
                        app_id: *app_id,
                        split: plan.split,
                    }),
                    vec![EventKind::FeedbackSubmitted {
                        feedback_id,
                        app_id: *app_id,
                        reviewer: reviewer.clone(),
                        rating: *rating,
                    }],
                ))
            }

            Command::UpdateSettings {
                caller,
                role,
                settings,
            } => {
                SettingsRegistry::check_update(caller, *role, settings)?;

                let staged = self.stage(state, &command, now, mode, None)?;
                let version = self.settle(state, staged, |_| Ok(self.settings.replace(settings.clone())))?;

                Ok((
                    Outcome::SettingsUpdated(version),
                    vec![EventKind::ProtocolSettingsUpdated {
                        version,
                        settings: settings.clone(),
                    }],
                ))
            }

            Command::ClaimOwnerRewards { owner } => {
                let amount = state.payouts.check_owner_claim(owner)?;

                let transfer = Transfer::new(TransferKind::OwnerRewardClaim, owner.clone(), amount, None);
                let staged = self.stage(state, &command, now, mode, Some(&transfer))?;
                self.deliver(staged.as_ref(), transfer, mode)?;
                let claimed = self.settle(state, staged, |state| {
                    let claimed = state.payouts.clear_owner_claim(owner);
                    state.totals.owner_claimed = state.totals.owner_claimed.saturating_add(claimed);
                    Ok(claimed)
                })?;

                Ok((
                    Outcome::OwnerRewardsClaimed(claimed),
                    vec![EventKind::OwnerRewardsClaimed {
                        owner: owner.clone(),
                        amount: claimed,
                    }],
                ))
            }

            Command::WithdrawProtocolFees {
                caller,
                role,
                recipient,
            } => {
                if *role != Role::Administrator {
                    return Err(Error::Unauthorized {
                        caller: caller.clone(),
                        action: "withdraw protocol fees",
                    });
                }
                let amount = state.payouts.check_treasury_withdrawal()?;

                let transfer =
                    Transfer::new(TransferKind::ProtocolFeeWithdrawal, recipient.clone(), amount, None);
                let staged = self.stage(state, &command, now, mode, Some(&transfer))?;
                self.deliver(staged.as_ref(), transfer, mode)?;
                let withdrawn = self.settle(state, staged, |state| {
                    let withdrawn = state.payouts.clear_treasury();
                    state.totals.fees_withdrawn = state.totals.fees_withdrawn.saturating_add(withdrawn);
                    Ok(withdrawn)
                })?;

                Ok((
                    Outcome::ProtocolFeesWithdrawn(withdrawn),
                    vec![EventKind::ProtocolFeesWithdrawn {
                        recipient: recipient.clone(),
                        amount: withdrawn,
                    }],
                ))
            }
        }
    }

    /// Reserve the journal record, and queue its transfer, for a validated command
    fn stage(
        &self,
        state: &LedgerState,
        command: &Command,
        now: DateTime<Utc>,
        mode: Mode,
        transfer: Option<&Transfer>,
    ) -> Result<Option<Staged>> {
        let storage = match (&self.storage, mode) {
            (Some(storage), Mode::Live) => storage,
            _ => return Ok(None),
        };

        let head = state.journal_head;
        let entry = JournalEntry::new(head.sequence + 1, now, command.clone(), head.hash)?;
        let transfer = transfer.filter(|t| !t.amount.is_zero()).cloned();
        storage.append(&entry, transfer.as_ref())?;
        Ok(Some(Staged { entry, transfer }))
    }

    fn unstage(&self, staged: &Staged) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.revert(&staged.entry, staged.transfer.as_ref()) {
            error!(sequence = staged.entry.sequence, error = %e, "Failed to revert journal entry");
            self.halted.store(true, Ordering::Release);
        }
    }

    /// Hand a transfer to the sink; on failure the staged record is reverted
    fn deliver(&self, staged: Option<&Staged>, transfer: Transfer, mode: Mode) -> Result<()> {
        if mode == Mode::Replay || transfer.amount.is_zero() {
            return Ok(());
        }

        match self.sink.transfer(&transfer) {
            Ok(()) => {
                self.metrics.record_transfer(transfer.kind);
                debug!(
                    transfer_id = %transfer.transfer_id,
                    kind = transfer.kind.as_str(),
                    recipient = %transfer.recipient,
                    amount = %transfer.amount,
                    "Transfer handed to sink"
                );
                // The built-in outbox acknowledges on drain; an external sink owns it now.
                if let (true, Some(storage)) = (self.external_sink, &self.storage) {
                    if let Err(e) = storage.remove_transfers(std::slice::from_ref(&transfer)) {
                        warn!(transfer_id = %transfer.transfer_id, error = %e, "Failed to acknowledge transfer");
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Some(staged) = staged {
                    self.unstage(staged);
                }
                Err(match e {
                    Error::TransferFailed(_) => e,
                    other => Error::TransferFailed(other.to_string()),
                })
            }
        }
    }

    /// Apply a validated transition and advance the journal head
    fn settle<T>(
        &self,
        state: &mut LedgerState,
        staged: Option<Staged>,
        commit: impl FnOnce(&mut LedgerState) -> Result<T>,
    ) -> Result<T> {
        match commit(state) {
            Ok(value) => {
                if let Some(staged) = staged {
                    state.journal_head = state.journal_head.advance(&staged.entry);
                }
                Ok(value)
            }
            Err(e) => {
                if let Some(staged) = &staged {
                    self.unstage(staged);
                }
                Err(violation(format!("validated transition failed: {}", e)))
            }
        }
    }

    // Read accessors

    /// Get app by ID
    pub fn get_app(&self, app_id: AppId) -> Result<App> {
        self.state.read().apps.get(app_id).cloned()
    }

    /// All apps ordered by ID
    pub fn list_apps(&self) -> Vec<App> {
        self.state.read().apps.list().cloned().collect()
    }

    /// Apps registered by `owner`
    pub fn apps_by_owner(&self, owner: &Principal) -> Vec<App> {
        self.state.read().apps.by_owner(owner).cloned().collect()
    }

    /// Number of registered apps
    pub fn app_count(&self) -> usize {
        self.state.read().apps.len()
    }

    /// Get feedback by ID
    pub fn get_feedback(&self, feedback_id: FeedbackId) -> Result<Feedback> {
        self.state.read().feedback.get(feedback_id).cloned()
    }

    /// Feedback for an app in submission order
    pub fn feedback_for_app(&self, app_id: AppId) -> Vec<Feedback> {
        self.state
            .read()
            .feedback
            .for_app(app_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Feedback written by a reviewer
    pub fn feedback_by_reviewer(&self, reviewer: &Principal) -> Vec<Feedback> {
        self.state.read().feedback.by_reviewer(reviewer).cloned().collect()
    }

    /// Whether the reviewer already reviewed the app
    pub fn has_reviewed(&self, app_id: AppId, reviewer: &Principal) -> bool {
        self.state.read().feedback.has_reviewed(app_id, reviewer)
    }

    /// Reward balance for a reviewer and source (zeroed if none)
    pub fn get_balance(&self, reviewer: &Principal, source: RewardSource) -> RewardBalance {
        self.state.read().balances.get_balance(reviewer, source)
    }

    /// Every source a reviewer has earned from
    pub fn list_sources(&self, reviewer: &Principal) -> Vec<RewardSource> {
        self.state.read().balances.list_sources(reviewer)
    }

    /// Every balance a reviewer holds
    pub fn balances_for(&self, reviewer: &Principal) -> Vec<(RewardSource, RewardBalance)> {
        self.state.read().balances.balances_for(reviewer)
    }

    /// Lifetime earnings across sources
    pub fn total_earned(&self, reviewer: &Principal) -> Amount {
        self.state.read().balances.total_earned(reviewer)
    }

    /// Owner shares waiting to be claimed
    pub fn owner_claimable(&self, owner: &Principal) -> Amount {
        self.state.read().payouts.owner_claimable(owner)
    }

    /// Protocol treasury balance
    pub fn protocol_treasury(&self) -> Amount {
        self.state.read().payouts.treasury()
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<ProtocolSettings> {
        self.settings.get()
    }

    /// Current settings version
    pub fn settings_version(&self) -> u64 {
        self.settings.version()
    }

    /// Base reward a rating would earn under the current settings
    pub fn base_reward(&self, rating: u8) -> Amount {
        calculate_base_reward(rating, &self.settings.get())
    }

    /// Subscribe to events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Built-in transfer outbox (empty when a custom sink is installed)
    pub fn transfer_outbox(&self) -> &TransferOutbox {
        &self.outbox
    }

    /// Last committed journal position
    pub fn journal_head(&self) -> JournalHead {
        self.state.read().journal_head
    }

    /// Running money totals
    pub fn totals(&self) -> LedgerTotals {
        self.state.read().totals
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Verify money conservation and rating counts
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.read();
        let totals = &state.totals;

        let expected_escrow = totals
            .deposited
            .checked_sub(totals.escrow_withdrawn)
            .and_then(|rest| rest.checked_sub(totals.rewards_debited));
        let escrow = state.apps.total_escrow();
        if expected_escrow != Some(escrow) {
            return Err(violation(format!(
                "escrow {} does not match deposits {} - withdrawals {} - rewards {}",
                escrow, totals.deposited, totals.escrow_withdrawn, totals.rewards_debited
            )));
        }

        let shares = totals
            .reviewer_paid
            .checked_add(totals.owner_accrued)
            .and_then(|sum| sum.checked_add(totals.protocol_accrued));
        if shares != Some(totals.rewards_debited) {
            return Err(violation(format!(
                "shares do not sum to rewards debited {}",
                totals.rewards_debited
            )));
        }

        let claimable = state.payouts.total_owner_claimable();
        if totals.owner_accrued.checked_sub(totals.owner_claimed) != Some(claimable) {
            return Err(violation(format!(
                "owner claimable {} does not match accrued {} - claimed {}",
                claimable, totals.owner_accrued, totals.owner_claimed
            )));
        }

        let treasury = state.payouts.treasury();
        if totals.protocol_accrued.checked_sub(totals.fees_withdrawn) != Some(treasury) {
            return Err(violation(format!(
                "treasury {} does not match accrued {} - withdrawn {}",
                treasury, totals.protocol_accrued, totals.fees_withdrawn
            )));
        }

        for app in state.apps.list() {
            let count = state.feedback.for_app(app.app_id).len() as u64;
            if count != app.total_ratings {
                return Err(violation(format!(
                    "app {} counts {} ratings but has {} feedback records",
                    app.app_id, app.total_ratings, count
                )));
            }
        }

        Ok(())
    }
}

fn unexpected(outcome: Outcome) -> Error {
    violation(format!("unexpected outcome {:?}", outcome))
}

fn violation(message: String) -> Error {
    error!(%message, "Ledger invariant violated");
    Error::InvariantViolation(message)
}
