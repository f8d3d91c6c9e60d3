//! Error types for the economy ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors.
///
/// Validation failures are expected business outcomes and are returned to
/// the caller as values; nothing here is thrown across the facade boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Amount was zero, negative, or otherwise not a valid quantity
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Balance too low to cover the requested debit
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        /// Current balance
        balance: Decimal,
        /// Amount the operation needed
        required: Decimal,
    },

    /// Deposit would push the balance over the configured maximum
    #[error("Balance limit exceeded: {attempted} > {max}")]
    LimitExceeded {
        /// Balance the operation would have produced
        attempted: Decimal,
        /// Configured maximum balance
        max: Decimal,
    },

    /// Transfer amount below the configured minimum
    #[error("Amount {amount} below minimum transaction {minimum}")]
    BelowMinimum {
        /// Requested amount
        amount: Decimal,
        /// Configured minimum
        minimum: Decimal,
    },

    /// Transfer where sender and receiver are the same account
    #[error("Cannot transfer to the same account")]
    SameAccount,

    /// Write rejected by the per-actor token bucket
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// How long the caller should back off
        retry_after_ms: u64,
    },

    /// Account does not exist in memory or storage
    #[error("Account not found: {0}")]
    AccountNotFound(crate::types::AccountId),

    /// Storage engine failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON error (flat-file engine)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Concurrency error (worker mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
