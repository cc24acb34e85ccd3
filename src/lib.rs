pub mod engine;
pub mod errors;
pub mod journal;
pub mod models;
pub mod provider;
pub mod server;
pub mod storage;
pub mod transaction_worker;
pub mod withdrawal_worker;

pub use engine::{Engine, EngineConfig, EngineEvents, EngineHandle};
pub use errors::{EngineError, ProviderError, ValidationError};
pub use models::{
    Account, Report, Transaction, TransactionId, TransactionStatus, Transfer, Withdrawal,
    WithdrawalId, WithdrawalRequest,
};
pub use provider::{ProviderState, StubProvider, WithdrawalProvider};
