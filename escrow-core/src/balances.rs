//! Per-reviewer, per-source reward balances

use crate::types::{Amount, Principal, RewardBalance, RewardSource};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Reward balances keyed by reviewer, then by source
#[derive(Debug, Clone, Default)]
pub struct RewardBalanceStore {
    balances: HashMap<Principal, BTreeMap<RewardSource, RewardBalance>>,
}

impl RewardBalanceStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a reviewer; creates the record on first credit
    pub fn credit(
        &mut self,
        reviewer: &Principal,
        source: RewardSource,
        amount: Amount,
        now: DateTime<Utc>,
    ) {
        let entry = self
            .balances
            .entry(reviewer.clone())
            .or_default()
            .entry(source)
            .or_default();

        entry.balance = entry.balance.saturating_add(amount);
        entry.total_earned = entry.total_earned.saturating_add(amount);
        entry.last_updated = Some(now);
    }

    /// Balance for a reviewer and source, zeroed if none exists
    pub fn get_balance(&self, reviewer: &Principal, source: RewardSource) -> RewardBalance {
        self.balances
            .get(reviewer)
            .and_then(|sources| sources.get(&source))
            .cloned()
            .unwrap_or_default()
    }

    /// Every source the reviewer has earned from, in source order
    pub fn list_sources(&self, reviewer: &Principal) -> Vec<RewardSource> {
        self.balances
            .get(reviewer)
            .map(|sources| sources.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every (source, balance) pair for a reviewer
    pub fn balances_for(&self, reviewer: &Principal) -> Vec<(RewardSource, RewardBalance)> {
        self.balances
            .get(reviewer)
            .map(|sources| {
                sources
                    .iter()
                    .map(|(source, balance)| (*source, balance.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lifetime earnings across all sources
    pub fn total_earned(&self, reviewer: &Principal) -> Amount {
        self.balances
            .get(reviewer)
            .map(|sources| {
                sources
                    .values()
                    .fold(Amount::ZERO, |acc, b| acc.saturating_add(b.total_earned))
            })
            .unwrap_or(Amount::ZERO)
    }
}
