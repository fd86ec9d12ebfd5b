//! Raw watcher stages and the canonical stage plans they project onto
//!
//! Every operation kind has a fixed, ordered list of canonical stages shown to
//! users. Watchers report richer raw stages, optionally nested one level deep
//! (`{"signing": "awaiting_wallet"}`), which the plan maps onto one canonical
//! stage. The last canonical stage is terminal for both success and failure.

pub mod projector;

pub use projector::{DisplayState, ProjectionFeed, Projection, StageProjector};

use crate::error::{TrackerError, TrackerResult};
use crate::intent::IntentKind;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw stage as reported by a watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageValue {
    Atomic(String),
    /// Active branch as the single key, its sub-state as the value
    Nested(BTreeMap<String, StageValue>),
}

impl StageValue {
    pub fn atomic(stage: impl Into<String>) -> Self {
        StageValue::Atomic(stage.into())
    }

    pub fn nested(branch: impl Into<String>, child: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(branch.into(), StageValue::Atomic(child.into()));
        StageValue::Nested(map)
    }

    /// Effective stage: the atomic value, or the key of a one-level mapping
    pub fn normalize(&self) -> TrackerResult<&str> {
        match self {
            StageValue::Atomic(stage) => Ok(stage),
            StageValue::Nested(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((branch, StageValue::Atomic(_))), None) => Ok(branch),
                    (Some((branch, StageValue::Nested(_))), None) => Err(
                        TrackerError::MalformedStage(format!("{} nests more than one level", branch)),
                    ),
                    (None, _) => Err(TrackerError::MalformedStage("empty mapping".to_string())),
                    (Some(_), Some(_)) => Err(TrackerError::MalformedStage(format!(
                        "{} active branches",
                        map.len()
                    ))),
                }
            }
        }
    }

    /// Human-readable form for logs and deposit settlements
    pub fn label(&self) -> String {
        match self.normalize() {
            Ok(stage) => stage.to_string(),
            Err(_) => serde_json::to_string(self).unwrap_or_else(|_| "<unprintable>".to_string()),
        }
    }
}

/// Canonical stage list and raw-stage mapping for one operation kind
#[derive(Debug)]
pub struct StagePlan {
    pub kind: IntentKind,
    /// Ordered canonical stages; the last one is terminal
    pub stages: &'static [&'static str],
    /// Raw stage a watcher reports when the intent failed
    pub error_stage: &'static str,
    /// Event tag a watcher accepts when it can be re-driven
    pub retry_event: &'static str,
    /// Raw stage -> canonical stage, for raw names that are not canonical themselves
    aliases: &'static [(&'static str, &'static str)],
}

pub static SWAP_PLAN: StagePlan = StagePlan {
    kind: IntentKind::Swap,
    stages: &["finding", "competing", "signing", "complete"],
    error_stage: "error",
    retry_event: "retry",
    aliases: &[
        ("idle", "finding"),
        ("submitted", "finding"),
        ("quoting", "competing"),
        ("awaiting_signature", "signing"),
        ("executing", "signing"),
        ("settling", "signing"),
        ("settled", "complete"),
        ("refunded", "complete"),
        ("error", "complete"),
    ],
};

pub static DEPOSIT_PLAN: StagePlan = StagePlan {
    kind: IntentKind::Deposit,
    stages: &["detecting", "confirming", "crediting", "complete"],
    error_stage: "error",
    retry_event: "retry",
    aliases: &[
        ("waiting", "detecting"),
        ("pending", "detecting"),
        ("confirmed", "crediting"),
        ("credited", "complete"),
        ("error", "complete"),
    ],
};

pub static WITHDRAW_PLAN: StagePlan = StagePlan {
    kind: IntentKind::Withdraw,
    stages: &["submitting", "bridging", "releasing", "complete"],
    error_stage: "error",
    retry_event: "retry",
    aliases: &[
        ("signing", "submitting"),
        ("publishing", "submitting"),
        ("in_flight", "bridging"),
        ("settling", "releasing"),
        ("released", "complete"),
        ("error", "complete"),
    ],
};

impl StagePlan {
    pub fn for_kind(kind: IntentKind) -> &'static StagePlan {
        match kind {
            IntentKind::Swap => &SWAP_PLAN,
            IntentKind::Deposit => &DEPOSIT_PLAN,
            IntentKind::Withdraw => &WITHDRAW_PLAN,
        }
    }

    /// Map a normalized raw stage onto a canonical stage
    pub fn map(&self, raw: &str) -> Option<&'static str> {
        if let Some(stage) = self.stages.iter().find(|s| **s == raw) {
            return Some(stage);
        }
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == raw)
            .map(|(_, stage)| *stage)
    }

    pub fn index_of(&self, canonical: &str) -> Option<usize> {
        self.stages.iter().position(|s| *s == canonical)
    }

    pub fn terminal_index(&self) -> usize {
        self.stages.len() - 1
    }

    pub fn first(&self) -> &'static str {
        self.stages[0]
    }

    pub fn is_error(&self, raw: &str) -> bool {
        raw == self.error_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_atomic_and_nested() {
        assert_eq!(StageValue::atomic("finding").normalize().unwrap(), "finding");
        assert_eq!(
            StageValue::nested("signing", "awaiting_wallet").normalize().unwrap(),
            "signing"
        );
    }

    #[test]
    fn test_normalize_rejects_deep_and_wide_values() {
        let deep: StageValue =
            serde_json::from_str(r#"{"signing": {"wallet": "prompting"}}"#).unwrap();
        assert!(matches!(deep.normalize(), Err(TrackerError::MalformedStage(_))));

        let wide: StageValue = serde_json::from_str(r#"{"a": "x", "b": "y"}"#).unwrap();
        assert!(wide.normalize().is_err());

        let empty: StageValue = serde_json::from_str("{}").unwrap();
        assert!(empty.normalize().is_err());
        assert_eq!(empty.label(), "{}");
    }

    #[test]
    fn test_plans_share_shape() {
        for kind in IntentKind::ALL {
            let plan = StagePlan::for_kind(kind);
            assert_eq!(plan.kind, kind);
            assert!(plan.stages.len() >= 2);
            assert_eq!(
                plan.map(plan.error_stage).and_then(|s| plan.index_of(s)),
                Some(plan.terminal_index()),
                "error stage of {} must land on the terminal slot",
                kind
            );
            for (_, target) in plan.aliases {
                assert!(plan.index_of(target).is_some(), "{} alias target {}", kind, target);
            }
        }
    }

    #[test]
    fn test_swap_mapping() {
        assert_eq!(SWAP_PLAN.map("finding"), Some("finding"));
        assert_eq!(SWAP_PLAN.map("quoting"), Some("competing"));
        assert_eq!(SWAP_PLAN.map("settled"), Some("complete"));
        assert_eq!(SWAP_PLAN.map("teleporting"), None);
        assert!(SWAP_PLAN.is_error("error"));
        assert!(!SWAP_PLAN.is_error("complete"));
    }
}
