//! Watcher contract and the polling actor behind every tracked intent
//!
//! This module provides:
//! - The `SettlementSource` capability a watcher polls
//! - Snapshots published to consumers over a `watch` channel
//! - The opaque `WatcherId` watchers use to signal their tracker
//! - A scripted source for replays and tests

pub mod polling;
pub mod scripted;

pub use polling::PollingWatcher;
pub use scripted::ScriptedSource;

use crate::error::TrackerResult;
use crate::events::SettlementEvent;
use crate::intent::{IntentKind, OperationDescriptor};
use crate::stage::{StagePlan, StageValue};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena key of a spawned watcher; never reused within a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Transaction context reported alongside the raw stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherContext {
    pub tx_hash: Option<String>,
    pub status: Option<String>,
}

/// Read-only view of a watcher's current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherSnapshot {
    pub value: StageValue,
    pub context: WatcherContext,
    /// Event tags the watcher accepts in this state
    pub accepts: Vec<String>,
}

impl WatcherSnapshot {
    /// Snapshot of a watcher that has not polled yet
    pub fn initial(plan: &StagePlan) -> Self {
        Self {
            value: StageValue::atomic(plan.first()),
            context: WatcherContext::default(),
            accepts: Vec::new(),
        }
    }

    pub fn can_accept(&self, tag: &str) -> bool {
        self.accepts.iter().any(|accepted| accepted == tag)
    }
}

/// One answer from the settlement source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub stage: StageValue,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub accepts: Vec<String>,
    /// No further progress without a retry
    #[serde(default)]
    pub terminal: bool,
}

impl PollReport {
    pub fn snapshot(&self) -> WatcherSnapshot {
        WatcherSnapshot {
            value: self.stage.clone(),
            context: WatcherContext {
                tx_hash: self.tx_hash.clone(),
                status: self.status.clone(),
            },
            accepts: self.accepts.clone(),
        }
    }
}

/// What a watcher knows about the intent it polls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub id: String,
    pub kind: IntentKind,
    pub descriptor: OperationDescriptor,
}

/// External settlement source polled by watchers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementSource: Send + Sync {
    /// Fetch the current settlement status of an intent
    async fn poll(&self, request: &PollRequest) -> TrackerResult<PollReport>;

    /// Re-drive a failed intent
    async fn retry(&self, request: &PollRequest) -> TrackerResult<()>;
}

/// Messages a tracker sends into a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherCommand {
    /// Deliver an event such as the plan's retry tag
    Event(String),
}

/// Messages a watcher sends back to its tracker
#[derive(Debug, Clone)]
pub struct WatcherSignal {
    pub watcher: WatcherId,
    pub event: SettlementEvent,
}
