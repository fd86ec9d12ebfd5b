//! Stage-dot rendering of a display state
//!
//! Pure function of a [`DisplayState`] and its plan: one marker per canonical
//! stage with connectors between them.

use crate::stage::{DisplayState, StagePlan};

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// Filled with a check
    Done,
    /// Spinner on the active stage
    Active,
    /// Terminal stage reached with an error
    Failed,
    Pending,
}

impl Marker {
    fn glyph(&self) -> char {
        match self {
            Marker::Done => '✓',
            Marker::Active => '◌',
            Marker::Failed => '✗',
            Marker::Pending => '○',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DockSlot {
    pub stage: &'static str,
    pub marker: Marker,
}

/// Rendered stage dots for one intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dock {
    pub slots: Vec<DockSlot>,
    /// `connectors[i]` joins slot `i` and `i + 1`; true once slot `i` is passed
    pub connectors: Vec<bool>,
}

/// Render the dock for a display state
pub fn render(state: &DisplayState, plan: &StagePlan) -> Dock {
    let terminal = plan.terminal_index();

    let slots = plan
        .stages
        .iter()
        .enumerate()
        .map(|(position, stage)| {
            let marker = if position < state.index {
                Marker::Done
            } else if position > state.index {
                Marker::Pending
            } else if position != terminal {
                Marker::Active
            } else if state.has_error {
                Marker::Failed
            } else {
                Marker::Done
            };
            DockSlot {
                stage: *stage,
                marker,
            }
        })
        .collect();

    let connectors = (0..terminal).map(|position| state.index > position).collect();

    Dock { slots, connectors }
}

impl fmt::Display for Dock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, slot) in self.slots.iter().enumerate() {
            if position > 0 {
                let passed = self.connectors.get(position - 1).copied().unwrap_or(false);
                f.write_str(if passed { "━" } else { "─" })?;
            }
            write!(f, "{}", slot.marker.glyph())?;
        }
        Ok(())
    }
}
