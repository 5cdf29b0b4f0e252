//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `escrow_apps_registered_total` - Apps registered
//! - `escrow_feedback_submitted_total` - Feedback accepted and paid
//! - `escrow_operations_rejected_total{kind}` - Rejected operations by error kind
//! - `escrow_transfers_total{kind}` - Outbound transfers by transfer kind
//! - `escrow_active_apps` - Apps currently accepting feedback
//!
//! Metrics live in a private registry so several ledgers can coexist in one
//! process (tests, replay tooling).

use crate::{error::ErrorKind, payout::TransferKind};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Apps registered
    pub apps_registered: IntCounter,

    /// Feedback accepted
    pub feedback_submitted: IntCounter,

    /// Rejected operations by error kind
    pub operations_rejected: IntCounterVec,

    /// Outbound transfers by kind
    pub transfers: IntCounterVec,

    /// Active apps
    pub active_apps: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("apps_registered", &self.apps_registered.get())
            .field("feedback_submitted", &self.feedback_submitted.get())
            .field("active_apps", &self.active_apps.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let apps_registered =
            IntCounter::new("escrow_apps_registered_total", "Total number of apps registered")?;
        registry.register(Box::new(apps_registered.clone()))?;

        let feedback_submitted = IntCounter::new(
            "escrow_feedback_submitted_total",
            "Total number of feedback submissions accepted",
        )?;
        registry.register(Box::new(feedback_submitted.clone()))?;

        let operations_rejected = IntCounterVec::new(
            Opts::new(
                "escrow_operations_rejected_total",
                "Rejected ledger operations by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(operations_rejected.clone()))?;

        let transfers = IntCounterVec::new(
            Opts::new("escrow_transfers_total", "Outbound transfers by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(transfers.clone()))?;

        let active_apps = IntGauge::new("escrow_active_apps", "Apps accepting feedback")?;
        registry.register(Box::new(active_apps.clone()))?;

        Ok(Self {
            apps_registered,
            feedback_submitted,
            operations_rejected,
            transfers,
            active_apps,
            registry,
        })
    }

    /// Record a rejected operation
    pub fn record_rejection(&self, kind: ErrorKind) {
        self.operations_rejected
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Record an outbound transfer
    pub fn record_transfer(&self, kind: TransferKind) {
        self.transfers.with_label_values(&[kind.as_str()]).inc();
    }

    /// Update active app gauge
    pub fn set_active_apps(&self, count: usize) {
        self.active_apps.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
