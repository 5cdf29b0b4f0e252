//! App ledger: registered apps, their escrow, lifecycle and rating aggregate
//!
//! # State machine
//!
//! ```text
//! registerApp ──► Active ──deactivateApp──► Deactivated (terminal)
//! ```
//!
//! Escrow moves only through `add_escrow`, `clear_escrow` (full withdrawal)
//! and `debit_escrow` (reward payouts). Every debit is checked, so escrow can
//! never go below zero.

use crate::{
    settings::ProtocolSettings,
    types::{Amount, App, AppId, Principal},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Listing metadata supplied at registration, stored as opaque strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistration {
    /// Display name (required)
    pub name: String,
    /// Description
    pub description: String,
    /// Home page URL
    pub home_url: String,
    /// Mini-app URL
    pub miniapp_url: String,
    /// Icon URL
    pub icon_url: String,
}

impl AppRegistration {
    /// Registration with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Owns every registered app
#[derive(Debug, Clone)]
pub struct AppLedger {
    apps: BTreeMap<AppId, App>,
    next_id: u64,
}

impl Default for AppLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AppLedger {
    /// Empty ledger; first app gets id 1
    pub fn new() -> Self {
        Self {
            apps: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Validate a registration and return the initial escrow it would fund
    pub fn check_registration(
        registration: &AppRegistration,
        payment: Amount,
        settings: &ProtocolSettings,
    ) -> Result<Amount> {
        if registration.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }

        payment
            .checked_sub(settings.app_registration_fee)
            .ok_or(Error::InsufficientFee {
                required: settings.app_registration_fee,
                provided: payment,
            })?;

        // The whole payment is held in escrow; the fee is only a minimum.
        Ok(payment)
    }

    /// Register a new app
    pub fn register(
        &mut self,
        owner: Principal,
        registration: AppRegistration,
        payment: Amount,
        settings: &ProtocolSettings,
        now: DateTime<Utc>,
    ) -> Result<AppId> {
        let escrow_amount = Self::check_registration(&registration, payment, settings)?;

        let app_id = AppId::new(self.next_id);
        self.next_id += 1;

        let app = App {
            app_id,
            owner,
            name: registration.name,
            description: registration.description,
            home_url: registration.home_url,
            miniapp_url: registration.miniapp_url,
            icon_url: registration.icon_url,
            escrow_amount,
            is_active: true,
            total_ratings: 0,
            rating_sum: 0,
            average_rating_tenths: 0,
            created_at: now,
        };
        self.apps.insert(app_id, app);

        Ok(app_id)
    }

    /// Get app by ID
    pub fn get(&self, app_id: AppId) -> Result<&App> {
        self.apps.get(&app_id).ok_or(Error::AppNotFound(app_id))
    }

    fn get_mut(&mut self, app_id: AppId) -> Result<&mut App> {
        self.apps.get_mut(&app_id).ok_or(Error::AppNotFound(app_id))
    }

    /// Get app and check the caller owns it
    pub fn owned_by(&self, app_id: AppId, caller: &Principal, action: &'static str) -> Result<&App> {
        let app = self.get(app_id)?;
        if &app.owner != caller {
            return Err(Error::Unauthorized {
                caller: caller.clone(),
                action,
            });
        }
        Ok(app)
    }

    /// Get app and check it still accepts feedback
    pub fn active(&self, app_id: AppId) -> Result<&App> {
        let app = self.get(app_id)?;
        if !app.is_active {
            return Err(Error::AppInactive(app_id));
        }
        Ok(app)
    }

    /// Top up escrow; returns the new escrow amount
    pub fn add_escrow(&mut self, app_id: AppId, caller: &Principal, amount: Amount) -> Result<Amount> {
        let new_escrow = self.check_add_escrow(app_id, caller, amount)?;
        self.get_mut(app_id)?.escrow_amount = new_escrow;
        Ok(new_escrow)
    }

    /// Validate a top-up and return the escrow it would produce
    pub fn check_add_escrow(&self, app_id: AppId, caller: &Principal, amount: Amount) -> Result<Amount> {
        let app = self.owned_by(app_id, caller, "add escrow")?;
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        app.escrow_amount
            .checked_add(amount)
            .ok_or_else(|| Error::InvariantViolation(format!("escrow overflow for app {}", app_id)))
    }

    /// Validate a full withdrawal and return the amount it would release
    pub fn check_withdraw(&self, app_id: AppId, caller: &Principal) -> Result<Amount> {
        let app = self.owned_by(app_id, caller, "withdraw escrow")?;
        if app.escrow_amount.is_zero() {
            return Err(Error::NothingToClaim);
        }
        Ok(app.escrow_amount)
    }

    /// Reset escrow to zero after a withdrawal transfer succeeded
    pub(crate) fn clear_escrow(&mut self, app_id: AppId) -> Result<Amount> {
        let app = self.get_mut(app_id)?;
        Ok(std::mem::take(&mut app.escrow_amount))
    }

    /// Validate a deactivation
    pub fn check_deactivate(&self, app_id: AppId, caller: &Principal) -> Result<()> {
        let app = self.owned_by(app_id, caller, "deactivate app")?;
        if !app.is_active {
            return Err(Error::AppInactive(app_id));
        }
        Ok(())
    }

    /// Deactivate an app (terminal)
    pub fn deactivate(&mut self, app_id: AppId, caller: &Principal) -> Result<()> {
        self.check_deactivate(app_id, caller)?;
        self.get_mut(app_id)?.is_active = false;
        Ok(())
    }

    /// Debit a payout from escrow; returns the remaining escrow
    pub(crate) fn debit_escrow(&mut self, app_id: AppId, amount: Amount) -> Result<Amount> {
        let app = self.get_mut(app_id)?;
        let remaining = app
            .escrow_amount
            .checked_sub(amount)
            .ok_or(Error::InsufficientEscrow {
                required: amount,
                available: app.escrow_amount,
            })?;
        app.escrow_amount = remaining;
        Ok(remaining)
    }

    /// Fold a new rating into the aggregate
    pub(crate) fn record_rating(&mut self, app_id: AppId, rating: u8) -> Result<()> {
        let app = self.get_mut(app_id)?;
        app.rating_sum += u64::from(rating);
        app.total_ratings += 1;
        app.average_rating_tenths = average_tenths(app.rating_sum, app.total_ratings);
        Ok(())
    }

    /// All apps ordered by ID
    pub fn list(&self) -> impl Iterator<Item = &App> {
        self.apps.values()
    }

    /// Apps registered by an owner
    pub fn by_owner<'a>(&'a self, owner: &'a Principal) -> impl Iterator<Item = &'a App> + 'a {
        self.apps.values().filter(move |app| &app.owner == owner)
    }

    /// Number of registered apps
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// No apps registered
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Number of active apps
    pub fn active_count(&self) -> usize {
        self.apps.values().filter(|app| app.is_active).count()
    }

    /// Sum of all escrow balances
    pub fn total_escrow(&self) -> Amount {
        self.apps
            .values()
            .fold(Amount::ZERO, |acc, app| acc.saturating_add(app.escrow_amount))
    }
}

/// Average of `sum / count` in tenths, rounded half-up
pub fn average_tenths(sum: u64, count: u64) -> u32 {
    if count == 0 {
        return 0;
    }
    // floor(sum * 10 / count + 1/2)
    let tenths = (u128::from(sum) * 20 + u128::from(count)) / (u128::from(count) * 2);
    u32::try_from(tenths).unwrap_or(u32::MAX)
}
