//! Monotonic display-stage projection of a watcher's raw state
//!
//! A projector belongs to one consumer observing one watcher. It only moves
//! the display stage forward, except for the retry restart: a display that
//! already sits on the terminal slot follows the watcher back to an earlier
//! stage. Out-of-order reports below the terminal slot are held, which hides
//! the flicker polling produces.
//!
//! While the watcher stays on the first canonical stage the projector shows a
//! one-time synthetic advance to the second stage after a short delay, so the
//! user sees progress before the settlement source does.

use super::StagePlan;
use crate::intent::IntentKind;
use crate::watcher::WatcherSnapshot;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

/// What one observation did to the display stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Display moved forward to the watcher's stage
    Advanced,
    /// Display left the terminal slot because the watcher was re-driven
    Restarted,
    /// Synthetic advance from the first to the second stage
    Synthetic,
    /// Display unchanged
    Held,
    /// Raw stage could not be mapped; last good stage kept
    Malformed,
}

/// Derived view handed to renderers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub kind: IntentKind,
    pub stage: &'static str,
    pub index: usize,
    /// Stage comes from the synthetic advance and is not yet confirmed
    pub synthetic: bool,
    pub can_retry: bool,
    pub has_error: bool,
    pub tx_hash: Option<String>,
    pub status: Option<String>,
}

impl DisplayState {
    pub fn is_terminal(&self, plan: &StagePlan) -> bool {
        self.index == plan.terminal_index()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntheticAdvance {
    Idle,
    Pending(Instant),
    Spent,
}

/// Per-consumer display state machine
#[derive(Debug)]
pub struct StageProjector {
    plan: &'static StagePlan,
    delay: Duration,
    index: usize,
    synthetic_shown: bool,
    synthetic: SyntheticAdvance,
    can_retry: bool,
    has_error: bool,
    tx_hash: Option<String>,
    status: Option<String>,
}

impl StageProjector {
    /// Create a projector showing the first canonical stage
    pub fn new(plan: &'static StagePlan, delay: Duration) -> Self {
        Self {
            plan,
            delay,
            index: 0,
            synthetic_shown: false,
            synthetic: SyntheticAdvance::Idle,
            can_retry: false,
            has_error: false,
            tx_hash: None,
            status: None,
        }
    }

    pub fn plan(&self) -> &'static StagePlan {
        self.plan
    }

    /// Apply a watcher snapshot observed at `now`
    pub fn observe(&mut self, snapshot: &WatcherSnapshot, now: Instant) -> Projection {
        self.tx_hash = snapshot.context.tx_hash.clone();
        self.status = snapshot.context.status.clone();
        self.can_retry = snapshot.can_accept(self.plan.retry_event);

        let raw = match snapshot.value.normalize() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(kind = %self.plan.kind, error = %e, "Keeping last display stage");
                return Projection::Malformed;
            }
        };

        let Some(machine) = self.plan.map(raw).and_then(|stage| self.plan.index_of(stage)) else {
            warn!(kind = %self.plan.kind, raw, "Unrecognized raw stage, keeping last display stage");
            return Projection::Malformed;
        };

        self.has_error = self.plan.is_error(raw);
        self.schedule_synthetic(machine, now);

        let terminal = self.plan.terminal_index();
        let outcome = if machine > self.index {
            Projection::Advanced
        } else if self.index == terminal && machine < self.index {
            Projection::Restarted
        } else {
            if machine == self.index {
                self.synthetic_shown = false;
            }
            return Projection::Held;
        };

        debug!(
            kind = %self.plan.kind,
            from = self.plan.stages[self.index],
            to = self.plan.stages[machine],
            ?outcome,
            "Display stage moved"
        );
        self.index = machine;
        self.synthetic_shown = false;
        outcome
    }

    /// Fire the synthetic advance if its deadline has passed
    pub fn tick(&mut self, now: Instant) -> Option<Projection> {
        let SyntheticAdvance::Pending(deadline) = self.synthetic else {
            return None;
        };
        if now < deadline {
            return None;
        }

        self.synthetic = SyntheticAdvance::Spent;
        if self.index != 0 {
            return None;
        }

        debug!(kind = %self.plan.kind, to = self.plan.stages[1], "Synthetic stage advance");
        self.index = 1;
        self.synthetic_shown = true;
        Some(Projection::Synthetic)
    }

    /// When the pending synthetic advance is due, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        match self.synthetic {
            SyntheticAdvance::Pending(deadline) => Some(deadline),
            _ => None,
        }
    }

    pub fn state(&self) -> DisplayState {
        DisplayState {
            kind: self.plan.kind,
            stage: self.plan.stages[self.index],
            index: self.index,
            synthetic: self.synthetic_shown,
            can_retry: self.can_retry,
            has_error: self.has_error,
            tx_hash: self.tx_hash.clone(),
            status: self.status.clone(),
        }
    }

    fn schedule_synthetic(&mut self, machine: usize, now: Instant) {
        match self.synthetic {
            SyntheticAdvance::Idle if machine == 0 && self.index == 0 => {
                self.synthetic = SyntheticAdvance::Pending(now + self.delay);
            }
            SyntheticAdvance::Idle | SyntheticAdvance::Pending(_) if machine != 0 => {
                self.synthetic = SyntheticAdvance::Spent;
            }
            _ => {}
        }
    }
}

/// Async driver pairing a projector with one watcher's snapshot channel
pub struct ProjectionFeed {
    snapshots: watch::Receiver<WatcherSnapshot>,
    projector: StageProjector,
    primed: bool,
}

impl ProjectionFeed {
    pub fn new(
        snapshots: watch::Receiver<WatcherSnapshot>,
        plan: &'static StagePlan,
        delay: Duration,
    ) -> Self {
        Self {
            snapshots,
            projector: StageProjector::new(plan, delay),
            primed: false,
        }
    }

    /// Wait for the next projection step
    ///
    /// The first call projects the current snapshot. Later calls wait for a
    /// snapshot change or the synthetic deadline. Returns `None` once the
    /// watcher is gone.
    pub async fn next(&mut self) -> Option<(Projection, DisplayState)> {
        if !self.primed {
            self.primed = true;
            let snapshot = self.snapshots.borrow_and_update().clone();
            let projection = self.projector.observe(&snapshot, Instant::now());
            return Some((projection, self.projector.state()));
        }

        loop {
            let deadline = self.projector.deadline();
            tokio::select! {
                changed = self.snapshots.changed() => {
                    changed.ok()?;
                    let snapshot = self.snapshots.borrow_and_update().clone();
                    let projection = self.projector.observe(&snapshot, Instant::now());
                    return Some((projection, self.projector.state()));
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(projection) = self.projector.tick(Instant::now()) {
                        return Some((projection, self.projector.state()));
                    }
                }
            }
        }
    }

    pub fn state(&self) -> DisplayState {
        self.projector.state()
    }
}
