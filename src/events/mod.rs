//! Settlement events relayed from watchers to subscribers
//!
//! Defines the notifications a watcher emits once its intent settles. Trackers
//! pass them on unmodified to analytics consumers and sibling trackers.

use crate::intent::{IntentKind, OperationDescriptor, Token};
use crate::stage::StagePlan;
use crate::watcher::PollReport;

use serde::{Deserialize, Serialize};

/// Terminal settlement notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SettlementEvent {
    /// Swap settled on the destination chain
    Swap {
        /// Intent hash or deposit address, as registered
        settlement_ref: String,
        tx_hash: String,
        token_in: Token,
        token_out: Token,
    },

    /// Deposit reached a terminal stage
    Deposit {
        id: String,
        stage: String,
        tx_hash: Option<String>,
    },

    /// Withdrawal released on the destination chain
    Withdraw {
        settlement_ref: String,
        tx_hash: String,
        token_in: Token,
        token_out: Token,
    },
}

impl SettlementEvent {
    /// Build the settlement event for a terminal poll report
    ///
    /// Swaps and withdrawals only settle with a transaction hash and never on
    /// the plan's error stage; a deposit reports its terminal stage either way.
    pub fn from_report(
        id: &str,
        descriptor: &OperationDescriptor,
        plan: &StagePlan,
        report: &PollReport,
    ) -> Option<Self> {
        if !report.terminal {
            return None;
        }

        let failed = report
            .stage
            .normalize()
            .map(|raw| plan.is_error(raw))
            .unwrap_or(false);

        match descriptor {
            OperationDescriptor::Deposit(_) => Some(SettlementEvent::Deposit {
                id: id.to_string(),
                stage: report.stage.label(),
                tx_hash: report.tx_hash.clone(),
            }),
            OperationDescriptor::Swap(_) | OperationDescriptor::Withdraw(_) if failed => None,
            OperationDescriptor::Swap(swap) => {
                let tx_hash = report.tx_hash.clone()?;
                Some(SettlementEvent::Swap {
                    settlement_ref: id.to_string(),
                    tx_hash,
                    token_in: swap.token_in.clone(),
                    token_out: swap.token_out.clone(),
                })
            }
            OperationDescriptor::Withdraw(withdraw) => {
                let tx_hash = report.tx_hash.clone()?;
                Some(SettlementEvent::Withdraw {
                    settlement_ref: id.to_string(),
                    tx_hash,
                    token_in: withdraw.token_in.clone(),
                    token_out: withdraw.token_out.clone(),
                })
            }
        }
    }

    /// Get the intent id this event settles
    pub fn intent_id(&self) -> &str {
        match self {
            SettlementEvent::Swap { settlement_ref, .. } => settlement_ref,
            SettlementEvent::Deposit { id, .. } => id,
            SettlementEvent::Withdraw { settlement_ref, .. } => settlement_ref,
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            SettlementEvent::Swap { .. } => IntentKind::Swap,
            SettlementEvent::Deposit { .. } => IntentKind::Deposit,
            SettlementEvent::Withdraw { .. } => IntentKind::Withdraw,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::Swap { .. } => "swap_settled",
            SettlementEvent::Deposit { .. } => "deposit_settled",
            SettlementEvent::Withdraw { .. } => "withdraw_settled",
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            SettlementEvent::Swap { tx_hash, .. } | SettlementEvent::Withdraw { tx_hash, .. } => {
                Some(tx_hash)
            }
            SettlementEvent::Deposit { tx_hash, .. } => tx_hash.as_deref(),
        }
    }
}
