//! Intent Tracker - lifecycle tracking for cross-chain swap, deposit and withdrawal intents
//!
//! Trackers own the intents a user submitted, spawn one polling watcher per
//! intent, and relay settlement events to subscribers. A stage projector turns
//! each watcher's raw stage into a monotonic display stage for the dock.

pub mod config;
pub mod dock;
pub mod error;
pub mod events;
pub mod intent;
pub mod metrics;
pub mod stage;
pub mod tracker;
pub mod watcher;

pub use error::{TrackerError, TrackerResult};
pub use events::SettlementEvent;
pub use intent::{IntentKind, OperationDescriptor, TrackedIntent};
pub use stage::{DisplayState, ProjectionFeed, StagePlan, StageProjector, StageValue};
pub use tracker::{RegisterOutcome, Tracker, TrackingSession};
pub use watcher::{PollReport, SettlementSource, WatcherId, WatcherSnapshot};
