//! Tracker module - owns tracked intents and their watchers
//!
//! This module provides:
//! - Idempotent registration with exactly one watcher per intent id
//! - Dismissal that cancels the watcher and silences its late signals
//! - Verbatim relay of watcher settlement events to subscribers
//! - Session-scoped ownership of the swap, deposit and withdraw trackers

pub mod session;

pub use session::TrackingSession;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::events::SettlementEvent;
use crate::intent::{IntentKind, OperationDescriptor, TrackedIntent};
use crate::stage::{ProjectionFeed, StagePlan};
use crate::watcher::{
    PollRequest, PollingWatcher, SettlementSource, WatcherCommand, WatcherId, WatcherSignal,
    WatcherSnapshot,
};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a register call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New entry; its watcher was spawned into this slot
    Registered(WatcherId),
    /// Id already tracked, or dismissed earlier; nothing changed
    Duplicate,
    /// Descriptor belongs to another tracker; nothing changed
    KindMismatch,
}

impl RegisterOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegisterOutcome::Registered(_))
    }
}

/// Arena entry for a live watcher
struct WatcherSlot {
    intent_id: String,
    commands: mpsc::UnboundedSender<WatcherCommand>,
    snapshots: watch::Receiver<WatcherSnapshot>,
    task: JoinHandle<()>,
}

/// Coordinator for all intents of one kind
pub struct Tracker {
    kind: IntentKind,
    plan: &'static StagePlan,
    config: TrackerConfig,
    source: Arc<dyn SettlementSource>,
    /// Tracked intents indexed by id
    entries: DashMap<String, TrackedIntent>,
    /// Live watchers indexed by their opaque id
    watchers: Arc<DashMap<WatcherId, WatcherSlot>>,
    /// Dismissed ids; a watcher is never respawned for them
    retired: DashSet<String>,
    next_watcher: AtomicU64,
    next_sequence: AtomicU64,
    spawned: AtomicU64,
    /// Send-back handle cloned into every watcher
    inbox: mpsc::UnboundedSender<WatcherSignal>,
    settlement_tx: broadcast::Sender<SettlementEvent>,
    relay: JoinHandle<()>,
}

impl Tracker {
    /// Create a tracker with its own settlement channel
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(kind: IntentKind, source: Arc<dyn SettlementSource>, config: TrackerConfig) -> Self {
        Self::build(kind, source, config, None)
    }

    /// Create a tracker that also forwards its settlements onto a shared bus
    ///
    /// Subscribers of this tracker still only see its own kind.
    pub fn with_bus(
        kind: IntentKind,
        source: Arc<dyn SettlementSource>,
        config: TrackerConfig,
        bus: broadcast::Sender<SettlementEvent>,
    ) -> Self {
        Self::build(kind, source, config, Some(bus))
    }

    fn build(
        kind: IntentKind,
        source: Arc<dyn SettlementSource>,
        config: TrackerConfig,
        bus: Option<broadcast::Sender<SettlementEvent>>,
    ) -> Self {
        let (settlement_tx, _) = broadcast::channel(config.settlement_channel_capacity);
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let watchers = Arc::new(DashMap::new());

        let relay = tokio::spawn(relay_settlements(
            kind,
            inbox_rx,
            watchers.clone(),
            settlement_tx.clone(),
            bus,
        ));

        info!("Initialized {} tracker", kind);

        Self {
            kind,
            plan: StagePlan::for_kind(kind),
            config,
            source,
            entries: DashMap::new(),
            watchers,
            retired: DashSet::new(),
            next_watcher: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            spawned: AtomicU64::new(0),
            inbox,
            settlement_tx,
            relay,
        }
    }

    pub fn kind(&self) -> IntentKind {
        self.kind
    }

    pub fn plan(&self) -> &'static StagePlan {
        self.plan
    }

    /// Start tracking an intent
    ///
    /// The first call for an id wins: later calls with the same id, including
    /// calls after the id was dismissed, and descriptors of another kind change
    /// nothing.
    pub fn register(&self, id: impl Into<String>, descriptor: OperationDescriptor) -> RegisterOutcome {
        let id = id.into();

        if !descriptor.matches(self.kind) {
            warn!(
                intent = %id,
                tracker = %self.kind,
                descriptor = %descriptor.kind(),
                "Ignoring descriptor of another kind"
            );
            crate::metrics::record_kind_mismatch(self.kind);
            return RegisterOutcome::KindMismatch;
        }

        // Tombstones are read and written under the entry's shard lock
        match self.entries.entry(id) {
            Entry::Occupied(occupied) => {
                debug!(intent = %occupied.key(), tracker = %self.kind, "Intent already tracked");
                crate::metrics::record_duplicate(self.kind);
                RegisterOutcome::Duplicate
            }
            Entry::Vacant(vacant) if self.retired.contains(vacant.key()) => {
                debug!(intent = %vacant.key(), tracker = %self.kind, "Intent was dismissed, not respawning");
                crate::metrics::record_duplicate(self.kind);
                RegisterOutcome::Duplicate
            }
            Entry::Vacant(vacant) => {
                let id = vacant.key().clone();
                let watcher = self.spawn_watcher(&id, &descriptor);
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

                vacant.insert(TrackedIntent {
                    id: id.clone(),
                    descriptor,
                    created_at: Utc::now(),
                    watcher,
                    sequence,
                });

                info!(intent = %id, tracker = %self.kind, %watcher, "Tracking intent");
                crate::metrics::record_registered(self.kind);
                RegisterOutcome::Registered(watcher)
            }
        }
    }

    /// Stop tracking an intent and cancel its watcher
    ///
    /// Returns false if the id was not tracked.
    pub fn dismiss(&self, id: &str) -> bool {
        let intent = match self.entries.entry(id.to_string()) {
            Entry::Occupied(occupied) => {
                self.retired.insert(occupied.key().clone());
                occupied.remove()
            }
            Entry::Vacant(_) => {
                debug!(intent = %id, tracker = %self.kind, "Dismiss of untracked intent");
                return false;
            }
        };

        // Slot goes first so the relay drops anything still in flight
        if let Some((_, slot)) = self.watchers.remove(&intent.watcher) {
            slot.task.abort();
        }

        info!(intent = %id, tracker = %self.kind, watcher = %intent.watcher, "Dismissed intent");
        crate::metrics::record_dismissed(self.kind);
        true
    }

    /// Dismiss every tracked intent
    pub fn dismiss_all(&self) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.dismiss(id)).count()
    }

    /// Tracked intents, newest first
    pub fn list(&self) -> Vec<TrackedIntent> {
        let mut intents: Vec<TrackedIntent> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        intents.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        intents
    }

    pub fn get(&self, id: &str) -> Option<TrackedIntent> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Watchers spawned over this tracker's lifetime
    pub fn spawned_total(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn live_watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Snapshot channel of the watcher behind `id`
    pub fn watch(&self, id: &str) -> Option<watch::Receiver<WatcherSnapshot>> {
        let intent = self.entries.get(id)?;
        let slot = self.watchers.get(&intent.watcher)?;
        Some(slot.snapshots.clone())
    }

    /// New projector feed for the watcher behind `id`
    ///
    /// Every call returns an independent feed with its own display state.
    pub fn follow(&self, id: &str) -> Option<ProjectionFeed> {
        self.watch(id)
            .map(|snapshots| ProjectionFeed::new(snapshots, self.plan, self.config.synthetic_delay()))
    }

    /// Deliver an event tag (such as the retry tag) to the watcher behind `id`
    pub fn send_event(&self, id: &str, tag: &str) -> TrackerResult<()> {
        let intent = self
            .entries
            .get(id)
            .ok_or_else(|| TrackerError::UnknownIntent { id: id.to_string() })?;
        let slot = self
            .watchers
            .get(&intent.watcher)
            .ok_or_else(|| TrackerError::WatcherGone { id: id.to_string() })?;

        if !slot.snapshots.borrow().can_accept(tag) {
            return Err(TrackerError::EventRejected {
                id: id.to_string(),
                tag: tag.to_string(),
            });
        }

        slot.commands
            .send(WatcherCommand::Event(tag.to_string()))
            .map_err(|_| TrackerError::WatcherGone { id: id.to_string() })
    }

    /// Re-drive a failed intent with the plan's retry event
    pub fn retry(&self, id: &str) -> TrackerResult<()> {
        self.send_event(id, self.plan.retry_event)
    }

    /// Subscribe to settlement events relayed by this tracker
    pub fn subscribe_settlements(&self) -> broadcast::Receiver<SettlementEvent> {
        self.settlement_tx.subscribe()
    }

    fn spawn_watcher(&self, id: &str, descriptor: &OperationDescriptor) -> WatcherId {
        let watcher_id = WatcherId(self.next_watcher.fetch_add(1, Ordering::Relaxed));
        let (snapshot_tx, snapshot_rx) = watch::channel(WatcherSnapshot::initial(self.plan));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let watcher = PollingWatcher::new(
            watcher_id,
            PollRequest {
                id: id.to_string(),
                kind: self.kind,
                descriptor: descriptor.clone(),
            },
            self.plan,
            self.source.clone(),
            self.config.poll_interval(),
            snapshot_tx,
            command_rx,
            self.inbox.clone(),
        );

        let task = tokio::spawn(watcher.run());
        self.spawned.fetch_add(1, Ordering::Relaxed);

        self.watchers.insert(
            watcher_id,
            WatcherSlot {
                intent_id: id.to_string(),
                commands: command_tx,
                snapshots: snapshot_rx,
                task,
            },
        );

        watcher_id
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        for slot in self.watchers.iter() {
            slot.task.abort();
        }
        crate::metrics::record_watchers_dropped(self.kind, self.watchers.len());
        self.relay.abort();
    }
}

/// Forward settlement signals from live watchers to subscribers
async fn relay_settlements(
    kind: IntentKind,
    mut inbox: mpsc::UnboundedReceiver<WatcherSignal>,
    watchers: Arc<DashMap<WatcherId, WatcherSlot>>,
    settlement_tx: broadcast::Sender<SettlementEvent>,
    bus: Option<broadcast::Sender<SettlementEvent>>,
) {
    while let Some(signal) = inbox.recv().await {
        let intent_id = match watchers.get(&signal.watcher) {
            Some(slot) => slot.intent_id.clone(),
            None => {
                debug!(
                    watcher = %signal.watcher,
                    event = signal.event.name(),
                    "Dropping settlement from dismissed watcher"
                );
                crate::metrics::record_late_signal(kind);
                continue;
            }
        };

        info!(
            intent = %intent_id,
            event = signal.event.name(),
            tx_hash = signal.event.tx_hash().unwrap_or("-"),
            "Relaying settlement"
        );
        crate::metrics::record_settlement_relayed(kind, &signal.event);

        if let Some(bus) = &bus {
            if bus.send(signal.event.clone()).is_err() {
                // No session subscribers, that's okay
            }
        }
        if settlement_tx.send(signal.event).is_err() {
            // No subscribers, that's okay
        }
    }
}
