//! Session-scoped ownership of the three trackers

use super::{RegisterOutcome, Tracker};
use crate::config::TrackerConfig;
use crate::events::SettlementEvent;
use crate::intent::{IntentKind, OperationDescriptor};
use crate::watcher::SettlementSource;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Swap, deposit and withdraw trackers forwarding onto one settlement bus
///
/// Created on session start and torn down with [`TrackingSession::shutdown`];
/// nothing outlives it.
pub struct TrackingSession {
    swaps: Tracker,
    deposits: Tracker,
    withdrawals: Tracker,
    settlement_tx: broadcast::Sender<SettlementEvent>,
}

impl TrackingSession {
    /// Start a session where every tracker polls the same source
    pub fn new(config: &TrackerConfig, source: Arc<dyn SettlementSource>) -> Self {
        Self::with_sources(config, source.clone(), source.clone(), source)
    }

    /// Start a session with one source per intent kind
    pub fn with_sources(
        config: &TrackerConfig,
        swap_source: Arc<dyn SettlementSource>,
        deposit_source: Arc<dyn SettlementSource>,
        withdraw_source: Arc<dyn SettlementSource>,
    ) -> Self {
        let (settlement_tx, _) = broadcast::channel(config.settlement_channel_capacity);

        let tracker = |kind, source| {
            Tracker::with_bus(kind, source, config.clone(), settlement_tx.clone())
        };

        let session = Self {
            swaps: tracker(IntentKind::Swap, swap_source),
            deposits: tracker(IntentKind::Deposit, deposit_source),
            withdrawals: tracker(IntentKind::Withdraw, withdraw_source),
            settlement_tx: settlement_tx.clone(),
        };

        info!("Tracking session started");
        session
    }

    pub fn tracker(&self, kind: IntentKind) -> &Tracker {
        match kind {
            IntentKind::Swap => &self.swaps,
            IntentKind::Deposit => &self.deposits,
            IntentKind::Withdraw => &self.withdrawals,
        }
    }

    pub fn swaps(&self) -> &Tracker {
        &self.swaps
    }

    pub fn deposits(&self) -> &Tracker {
        &self.deposits
    }

    pub fn withdrawals(&self) -> &Tracker {
        &self.withdrawals
    }

    /// Register with the tracker that owns the descriptor's kind
    pub fn register(&self, id: impl Into<String>, descriptor: OperationDescriptor) -> RegisterOutcome {
        self.tracker(descriptor.kind()).register(id, descriptor)
    }

    pub fn dismiss(&self, kind: IntentKind, id: &str) -> bool {
        self.tracker(kind).dismiss(id)
    }

    /// Settlement events from all three trackers, in relay order
    pub fn subscribe_settlements(&self) -> broadcast::Receiver<SettlementEvent> {
        self.settlement_tx.subscribe()
    }

    /// Tracked intents across all trackers
    pub fn len(&self) -> usize {
        IntentKind::ALL.iter().map(|kind| self.tracker(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dismiss every intent and stop all trackers
    pub fn shutdown(self) -> usize {
        let dismissed: usize = IntentKind::ALL
            .iter()
            .map(|kind| self.tracker(*kind).dismiss_all())
            .sum();

        info!(dismissed, "Tracking session shut down");
        dismissed
    }
}
