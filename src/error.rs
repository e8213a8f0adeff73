use std::fmt;

use thiserror::Error;

use crate::types::{Round, TableId};

/// Workflow kinds that surface errors or hold an in-flight slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Refresh,
    HoleCards,
    CommunityCards,
    SkipTimedOut,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Refresh => "table refresh",
            Operation::HoleCards => "hole card decryption",
            Operation::CommunityCards => "community card decryption",
            Operation::SkipTimedOut => "timeout skip",
        };
        f.write_str(label)
    }
}

/// How an error is treated: retried, corrected once, surfaced, or swallowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permission,
    UserRejected,
    Terminal,
    BestEffort,
}

/// Failure reported by an external collaborator (ledger, decryption service, wallet).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not available yet: {0}")]
    NotYetAvailable(String),

    #[error("service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("decryption authority already granted")]
    AlreadyGranted,

    #[error("request rejected by user")]
    UserRejected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("player is not seated at table {0}")]
    NotSeated(TableId),

    #[error("invalid for current state: {0}")]
    InvalidState(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::NotYetAvailable(_)
            | ProviderError::Unavailable(_)
            | ProviderError::Transport(_) => ErrorClass::Transient,
            ProviderError::Unauthorized(_) => ErrorClass::Permission,
            ProviderError::UserRejected => ErrorClass::UserRejected,
            ProviderError::AlreadyGranted => ErrorClass::BestEffort,
            ProviderError::NotFound(_)
            | ProviderError::NotSeated(_)
            | ProviderError::InvalidState(_)
            | ProviderError::InsufficientBalance => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Error surfaced by an engine operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: Operation,
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    #[error("{0} already in progress")]
    AlreadyInFlight(Operation),

    #[error("no table is selected")]
    NoActiveTable,

    #[error("result for table {table_id} round {round} is stale")]
    Stale { table_id: TableId, round: Round },

    #[error("operation cancelled")]
    Cancelled,

    #[error("client storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Provider(err) => err.class(),
            SyncError::RetriesExhausted { .. } => ErrorClass::Transient,
            SyncError::NoActiveTable => ErrorClass::Terminal,
            SyncError::AlreadyInFlight(_)
            | SyncError::Stale { .. }
            | SyncError::Cancelled
            | SyncError::Storage(_) => ErrorClass::BestEffort,
        }
    }

    /// Whether the rendering layer should see this error at all.
    pub fn is_user_facing(&self) -> bool {
        self.class() != ErrorClass::BestEffort
    }

    /// Single message shown to the player for this failure.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::RetriesExhausted {
                operation,
                attempts,
                ..
            } => format!(
                "The {operation} is still unavailable after {attempts} attempts. Please try again shortly."
            ),
            SyncError::Provider(err) => provider_message(err),
            SyncError::NoActiveTable => "Select a table first.".to_string(),
            SyncError::AlreadyInFlight(operation) => {
                format!("A {operation} is already running.")
            }
            SyncError::Stale { .. } => {
                "The table moved on before the request finished.".to_string()
            }
            SyncError::Cancelled => "The request was cancelled.".to_string(),
            SyncError::Storage(_) => "Local session data could not be saved.".to_string(),
        }
    }
}

fn provider_message(err: &ProviderError) -> String {
    match err {
        ProviderError::NotYetAvailable(_)
        | ProviderError::Unavailable(_)
        | ProviderError::Transport(_) => {
            "The network is temporarily unavailable. Please try again shortly.".to_string()
        }
        ProviderError::Unauthorized(_) => {
            "Decryption permission was denied. Re-authorize your account and retry.".to_string()
        }
        ProviderError::AlreadyGranted => "Decryption access is already set up.".to_string(),
        ProviderError::UserRejected => "The request was rejected in your wallet.".to_string(),
        ProviderError::NotFound(what) => format!("Not found: {what}."),
        ProviderError::NotSeated(table_id) => {
            format!("You are not seated at table {table_id}.")
        }
        ProviderError::InvalidState(reason) => format!("Not allowed right now: {reason}."),
        ProviderError::InsufficientBalance => "Insufficient balance.".to_string(),
    }
}
