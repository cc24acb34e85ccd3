use crate::models::WithdrawalId;
use thiserror::Error;

/// Rejections raised at the API boundary, before a message enters the
/// engine queues.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("source and destination accounts cannot be the same")]
    SameAccount,
    #[error("{0} cannot be blank")]
    BlankField(&'static str),
}

/// Errors surfaced by the external settlement provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Re-registration of an id with a different address or amount. This
    /// is a contract violation, not a retryable condition.
    #[error("withdrawal {0} already registered with different parameters")]
    ParameterMismatch(WithdrawalId),
    #[error("withdrawal {0} is not known to the provider")]
    UnknownWithdrawal(WithdrawalId),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine queue closed")]
    QueueClosed,
}
