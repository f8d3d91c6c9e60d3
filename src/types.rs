//! Core types for the economy ledger
//!
//! All monetary values use exact decimal arithmetic; every persisted type
//! derives serde so the storage engines can share one logical layout.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque actor identifier.
///
/// `Ord` is derived so two-account operations can acquire locks in a
/// canonical global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Wrap an existing UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random id
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw bytes, used as storage keys
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Truncated preview used when no display name is known
    pub fn preview(&self) -> String {
        let s = self.0.to_string();
        format!("{}...", &s[..8])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One actor's balance record and lifetime counters.
///
/// Owned exclusively by the ledger; external callers always receive copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,

    /// Current balance, `0 <= balance <= max_balance`
    pub balance: Decimal,

    /// Lifetime earnings, monotonically non-decreasing
    pub total_earned: Decimal,

    /// Lifetime spending, monotonically non-decreasing
    pub total_spent: Decimal,

    /// Cached display name, if one has been resolved
    pub display_name: Option<String>,

    /// Whether this account opted into public statistics displays
    pub stats_visible: bool,

    /// Timestamp of the last mutation
    pub last_transaction: DateTime<Utc>,

    /// Pending-persistence marker, cleared on flush
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Account {
    /// Create a fresh account with the configured starting balance
    pub fn new(id: AccountId, starting_balance: Decimal) -> Self {
        Self {
            id,
            balance: starting_balance,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            display_name: None,
            stats_visible: true,
            last_transaction: Utc::now(),
            dirty: false,
        }
    }
}

/// Kind of ledger mutation recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Balance increase
    Deposit,
    /// Balance decrease
    Withdraw,
    /// Receiving leg of a transfer
    TransferIn,
    /// Sending leg of a transfer (amount plus fee)
    TransferOut,
    /// Administrative overwrite
    AdminSet,
    /// Administrative reset to zero
    AdminReset,
}

impl TransactionKind {
    /// Stable string form used by the relational engine
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::AdminSet => "admin_set",
            TransactionKind::AdminReset => "admin_reset",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdraw" => Some(TransactionKind::Withdraw),
            "transfer_in" => Some(TransactionKind::TransferIn),
            "transfer_out" => Some(TransactionKind::TransferOut),
            "admin_set" => Some(TransactionKind::AdminSet),
            "admin_reset" => Some(TransactionKind::AdminReset),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable transaction-log record. Append-only; never mutated or deleted
/// by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Increasing id assigned by the storage engine (0 until stored)
    pub id: u64,

    /// When the mutation happened
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub kind: TransactionKind,

    /// Account the funds came from, if any
    pub source: Option<AccountId>,

    /// Account the funds went to, if any
    pub target: Option<AccountId>,

    /// Amount moved (for transfer-out this excludes the fee; the fee is
    /// recorded separately in the entry reason)
    pub amount: Decimal,

    /// Free-text reason or acting-party label
    pub reason: String,

    /// Display name of the primary account at the time of the mutation
    pub display_name: Option<String>,
}

impl TransactionEntry {
    /// Build an unstored entry stamped with the current time
    pub fn now(
        kind: TransactionKind,
        source: Option<AccountId>,
        target: Option<AccountId>,
        amount: Decimal,
        reason: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            kind,
            source,
            target,
            amount,
            reason: reason.into(),
            display_name,
        }
    }
}

/// One account's balance captured on a calendar day. Re-capturing the same
/// day overwrites (idempotent upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Calendar day of the capture
    pub day: NaiveDate,

    /// Account captured
    pub account: AccountId,

    /// Balance at capture time
    pub balance: Decimal,
}

/// Transient leaderboard row, derived from the live account table and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Account identifier
    pub account: AccountId,

    /// Resolved display name, if known
    pub display_name: Option<String>,

    /// Balance at computation time
    pub balance: Decimal,

    /// Balance change versus the reference snapshot (zero when no snapshot
    /// was requested)
    pub trend: Decimal,
}
