//! Intent kinds and the operation descriptors submitted for tracking
//!
//! A descriptor is a closed tagged union over the three operation kinds. Each
//! tracker only accepts descriptors of its own kind; swap and withdraw
//! descriptors also carry an [`IntentDescription`] whose tag must agree.

use crate::watcher::WatcherId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation kinds, one tracker each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Swap,
    Deposit,
    Withdraw,
}

impl IntentKind {
    pub const ALL: [IntentKind; 3] = [IntentKind::Swap, IntentKind::Deposit, IntentKind::Withdraw];

    /// Get kind name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            IntentKind::Swap => "swap",
            IntentKind::Deposit => "deposit",
            IntentKind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A token as seen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub chain: String,
    #[serde(default)]
    pub address: Option<String>,
    pub decimals: u8,
}

/// Token amount in base units
///
/// Serialized as a decimal string so 18-decimal amounts survive JSON and
/// tagged-enum buffering; plain integers are accepted on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub u128);

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(Amount(u128::from(value))),
            Raw::Text(text) => text
                .parse::<u128>()
                .map(Amount)
                .map_err(|e| serde::de::Error::custom(format!("invalid amount {:?}: {}", text, e))),
        }
    }
}

/// Concrete on-chain deployment of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDeployment {
    pub chain: String,
    pub address: String,
    pub decimals: u8,
}

/// Signed intent payload summary, tagged by the operation it describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IntentDescription {
    Swap {
        #[serde(default)]
        exact_out: bool,
        #[serde(default)]
        slippage_bps: u16,
    },
    Withdraw {
        destination_chain: String,
        recipient: String,
    },
}

impl IntentDescription {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentDescription::Swap { .. } => IntentKind::Swap,
            IntentDescription::Withdraw { .. } => IntentKind::Withdraw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapDescriptor {
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: Amount,
    /// As quoted
    pub amount_out: Amount,
    pub intent: IntentDescription,
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default)]
    pub one_click: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDescriptor {
    pub token: Token,
    pub token_deployment: TokenDeployment,
    pub amount: Amount,
    pub chain_name: String,
    pub user_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawDescriptor {
    pub token_in: Token,
    pub token_out: Token,
    pub intent: IntentDescription,
}

/// What the caller submits alongside an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationDescriptor {
    Swap(SwapDescriptor),
    Deposit(DepositDescriptor),
    Withdraw(WithdrawDescriptor),
}

impl OperationDescriptor {
    /// Kind of the outer tag
    pub fn kind(&self) -> IntentKind {
        match self {
            OperationDescriptor::Swap(_) => IntentKind::Swap,
            OperationDescriptor::Deposit(_) => IntentKind::Deposit,
            OperationDescriptor::Withdraw(_) => IntentKind::Withdraw,
        }
    }

    /// Check that both the outer tag and any nested intent description match `kind`
    pub fn matches(&self, kind: IntentKind) -> bool {
        match self {
            OperationDescriptor::Swap(swap) => {
                kind == IntentKind::Swap && swap.intent.kind() == IntentKind::Swap
            }
            OperationDescriptor::Deposit(_) => kind == IntentKind::Deposit,
            OperationDescriptor::Withdraw(withdraw) => {
                kind == IntentKind::Withdraw && withdraw.intent.kind() == IntentKind::Withdraw
            }
        }
    }

    /// Tokens moved by this operation, as (in, out)
    pub fn tokens(&self) -> (&Token, &Token) {
        match self {
            OperationDescriptor::Swap(swap) => (&swap.token_in, &swap.token_out),
            OperationDescriptor::Deposit(deposit) => (&deposit.token, &deposit.token),
            OperationDescriptor::Withdraw(withdraw) => (&withdraw.token_in, &withdraw.token_out),
        }
    }
}

/// A tracked intent, owned by exactly one tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedIntent {
    pub id: String,
    pub descriptor: OperationDescriptor,
    pub created_at: DateTime<Utc>,
    /// Slot of the watcher spawned for this intent
    pub watcher: WatcherId,
    /// Registration order; higher is newer
    pub(crate) sequence: u64,
}

impl TrackedIntent {
    pub fn kind(&self) -> IntentKind {
        self.descriptor.kind()
    }
}
