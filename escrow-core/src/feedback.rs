//! Feedback ledger: immutable feedback records, one per (app, reviewer)

use crate::{
    apps::AppLedger,
    reward::{MAX_RATING, MIN_RATING},
    types::{Amount, AppId, Feedback, FeedbackId, Principal},
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rewards paid for one feedback, as recorded on the feedback record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidShares {
    /// Reviewer share
    pub reviewer: Amount,
    /// App owner share
    pub owner: Amount,
    /// Protocol share
    pub protocol: Amount,
}

/// Owns every feedback record
#[derive(Debug, Clone)]
pub struct FeedbackLedger {
    records: BTreeMap<FeedbackId, Feedback>,
    reviewed: HashSet<(AppId, Principal)>,
    by_app: HashMap<AppId, Vec<FeedbackId>>,
    next_id: u64,
}

impl Default for FeedbackLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackLedger {
    /// Empty ledger; first feedback gets id 1
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            reviewed: HashSet::new(),
            by_app: HashMap::new(),
            next_id: 1,
        }
    }

    /// Run every submission check, in order, without mutating anything
    pub fn check_submission(
        &self,
        apps: &AppLedger,
        app_id: AppId,
        reviewer: &Principal,
        rating: u8,
        comment: &str,
    ) -> Result<()> {
        apps.active(app_id)?;

        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(Error::InvalidRating(rating));
        }

        if comment.trim().is_empty() {
            return Err(Error::EmptyComment);
        }

        if self.has_reviewed(app_id, reviewer) {
            return Err(Error::DuplicateFeedback {
                app_id,
                reviewer: reviewer.clone(),
            });
        }

        Ok(())
    }

    /// Store a paid feedback record. Callers run `check_submission` first.
    pub(crate) fn insert(
        &mut self,
        app_id: AppId,
        reviewer: Principal,
        rating: u8,
        comment: String,
        shares: PaidShares,
        now: DateTime<Utc>,
    ) -> Result<FeedbackId> {
        if !self.reviewed.insert((app_id, reviewer.clone())) {
            return Err(Error::DuplicateFeedback { app_id, reviewer });
        }

        let feedback_id = FeedbackId::new(self.next_id);
        self.next_id += 1;

        self.records.insert(
            feedback_id,
            Feedback {
                feedback_id,
                app_id,
                reviewer,
                rating,
                comment,
                reward_amount: shares.reviewer,
                owner_reward: shares.owner,
                protocol_reward: shares.protocol,
                created_at: now,
            },
        );
        self.by_app.entry(app_id).or_default().push(feedback_id);

        Ok(feedback_id)
    }

    /// Whether the reviewer already reviewed the app
    pub fn has_reviewed(&self, app_id: AppId, reviewer: &Principal) -> bool {
        // (AppId, Principal) tuple lookup needs an owned key
        self.reviewed.contains(&(app_id, reviewer.clone()))
    }

    /// Get feedback by ID
    pub fn get(&self, feedback_id: FeedbackId) -> Result<&Feedback> {
        self.records
            .get(&feedback_id)
            .ok_or(Error::FeedbackNotFound(feedback_id))
    }

    /// Feedback for an app in submission order
    pub fn for_app(&self, app_id: AppId) -> Vec<&Feedback> {
        self.by_app
            .get(&app_id)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    /// Feedback written by a reviewer
    pub fn by_reviewer<'a>(&'a self, reviewer: &'a Principal) -> impl Iterator<Item = &'a Feedback> + 'a {
        self.records.values().filter(move |f| &f.reviewer == reviewer)
    }

    /// Number of feedback records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No feedback recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
