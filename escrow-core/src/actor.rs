//! Async single-writer front end for the ledger
//!
//! Mutating commands from any number of tasks are funneled through a bounded
//! mailbox into one actor task, which applies them to the [`Ledger`] in
//! arrival order. Reads skip the mailbox and go straight to the ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        API / bot / dispatcher tasks (many)           │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                   │
//! │   commands → mailbox          reads → Arc<Ledger>    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (single task)               │
//! │          Ledger::execute(command) → oneshot          │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{
    apps::AppRegistration,
    ledger::{FeedbackReceipt, Ledger, Outcome},
    payout::Transfer,
    settings::ProtocolSettings,
    storage::Command,
    types::{Amount, AppId, Principal, Role},
    Error, Result,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Apply a mutating command
    Execute {
        /// Command to apply
        command: Command,
        /// Where the outcome is sent
        response: oneshot::Sender<Result<Outcome>>,
    },

    /// Stop the actor
    Shutdown,
}

/// Actor that applies commands one at a time
pub struct LedgerActor {
    /// Ledger being written
    ledger: Arc<Ledger>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(ledger: Arc<Ledger>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { ledger, mailbox }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Execute { command, response } => {
                    let name = command.name();
                    let result = self.ledger.execute(command);
                    if response.send(result).is_err() {
                        tracing::debug!(command = name, "Caller went away before the reply");
                    }
                }
                LedgerMessage::Shutdown => {
                    tracing::info!("Ledger actor shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle for sending commands to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
    ledger: Arc<Ledger>,
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("mailbox_capacity", &self.sender.max_capacity())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>, ledger: Arc<Ledger>) -> Self {
        Self { sender, ledger }
    }

    /// Ledger for read accessors
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Send a command and wait for its outcome
    pub async fn execute(&self, command: Command) -> Result<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Execute {
                command,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Register an app
    pub async fn register_app(
        &self,
        owner: Principal,
        registration: AppRegistration,
        payment: Amount,
    ) -> Result<AppId> {
        match self
            .execute(Command::RegisterApp {
                owner,
                registration,
                payment,
            })
            .await?
        {
            Outcome::AppRegistered(app_id) => Ok(app_id),
            other => Err(mismatch(other)),
        }
    }

    /// Top up escrow
    pub async fn add_escrow(&self, app_id: AppId, caller: Principal, amount: Amount) -> Result<Amount> {
        match self
            .execute(Command::AddEscrow {
                app_id,
                caller,
                amount,
            })
            .await?
        {
            Outcome::EscrowAdded(escrow) => Ok(escrow),
            other => Err(mismatch(other)),
        }
    }

    /// Withdraw the whole escrow
    pub async fn withdraw_escrow(&self, app_id: AppId, caller: Principal) -> Result<Amount> {
        match self.execute(Command::WithdrawEscrow { app_id, caller }).await? {
            Outcome::EscrowWithdrawn(amount) => Ok(amount),
            other => Err(mismatch(other)),
        }
    }

    /// Deactivate an app
    pub async fn deactivate_app(&self, app_id: AppId, caller: Principal) -> Result<()> {
        match self.execute(Command::DeactivateApp { app_id, caller }).await? {
            Outcome::AppDeactivated(_) => Ok(()),
            other => Err(mismatch(other)),
        }
    }

    /// Submit feedback
    pub async fn submit_feedback(
        &self,
        app_id: AppId,
        reviewer: Principal,
        rating: u8,
        comment: impl Into<String>,
    ) -> Result<FeedbackReceipt> {
        match self
            .execute(Command::SubmitFeedback {
                app_id,
                reviewer,
                rating,
                comment: comment.into(),
            })
            .await?
        {
            Outcome::FeedbackSubmitted(receipt) => Ok(receipt),
            other => Err(mismatch(other)),
        }
    }

    /// Replace protocol settings
    pub async fn update_settings(
        &self,
        caller: Principal,
        role: Role,
        settings: ProtocolSettings,
    ) -> Result<u64> {
        match self
            .execute(Command::UpdateSettings {
                caller,
                role,
                settings,
            })
            .await?
        {
            Outcome::SettingsUpdated(version) => Ok(version),
            other => Err(mismatch(other)),
        }
    }

    /// Claim accrued owner shares
    pub async fn claim_owner_rewards(&self, owner: Principal) -> Result<Amount> {
        match self.execute(Command::ClaimOwnerRewards { owner }).await? {
            Outcome::OwnerRewardsClaimed(amount) => Ok(amount),
            other => Err(mismatch(other)),
        }
    }

    /// Pay out the protocol treasury
    pub async fn withdraw_protocol_fees(
        &self,
        caller: Principal,
        role: Role,
        recipient: Principal,
    ) -> Result<Amount> {
        match self
            .execute(Command::WithdrawProtocolFees {
                caller,
                role,
                recipient,
            })
            .await?
        {
            Outcome::ProtocolFeesWithdrawn(amount) => Ok(amount),
            other => Err(mismatch(other)),
        }
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

fn mismatch(outcome: Outcome) -> Error {
    Error::InvariantViolation(format!("actor replied with unexpected outcome {:?}", outcome))
}

/// Spawn the ledger actor with a bounded mailbox (backpressure)
pub fn spawn_ledger_actor(ledger: Arc<Ledger>, mailbox_capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let actor = LedgerActor::new(ledger.clone(), rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx, ledger)
}

/// Drain the ledger's built-in transfer outbox every `interval`, handing each
/// transfer to `forward`. Drained transfers are acknowledged in the journal.
pub fn spawn_outbox_drainer<F>(ledger: Arc<Ledger>, interval: Duration, mut forward: F) -> JoinHandle<()>
where
    F: FnMut(Transfer) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match ledger.transfer_outbox().drain() {
                Ok(transfers) => {
                    if !transfers.is_empty() {
                        tracing::debug!(count = transfers.len(), "Drained transfer outbox");
                    }
                    transfers.into_iter().for_each(&mut forward);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to drain transfer outbox"),
            }
        }
    })
}
