use crate::errors::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Named account with a spendable balance and funds reserved for
/// withdrawals that are still in flight. Both fields stay non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: Decimal,
    pub reserve: Decimal,
}

impl Account {
    pub fn new(name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            name: name.into(),
            balance,
            reserve: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.balance + self.reserve
    }
}

/// Identifies one logical transfer or withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    pub id: Uuid,
    pub user_id: String,
}

impl TransactionId {
    pub fn new(user_id: impl Into<String>) -> Result<Self, ValidationError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ValidationError::BlankField("user id"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Completed and Failed are terminal; once reached they are never
    /// overwritten.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Processing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Money movement between two internal accounts. Lives only on the
/// inbound queue, never persisted as its own entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub transaction_id: TransactionId,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
}

impl Transfer {
    pub fn new(
        transaction_id: TransactionId,
        from_account: impl Into<String>,
        to_account: impl Into<String>,
        amount: Decimal,
    ) -> Result<Self, ValidationError> {
        let from_account = from_account.into();
        let to_account = to_account.into();
        if from_account.trim().is_empty() {
            return Err(ValidationError::BlankField("source account"));
        }
        if to_account.trim().is_empty() {
            return Err(ValidationError::BlankField("destination account"));
        }
        if from_account == to_account {
            return Err(ValidationError::SameAccount);
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount);
        }
        Ok(Self {
            transaction_id,
            from_account,
            to_account,
            amount,
        })
    }
}

/// Request to move funds out to an external settlement address.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub transaction_id: TransactionId,
    pub account_name: String,
    pub to_address: String,
    pub amount: Decimal,
}

impl WithdrawalRequest {
    pub fn new(
        transaction_id: TransactionId,
        account_name: impl Into<String>,
        to_address: impl Into<String>,
        amount: Decimal,
    ) -> Result<Self, ValidationError> {
        let account_name = account_name.into();
        let to_address = to_address.into();
        if account_name.trim().is_empty() {
            return Err(ValidationError::BlankField("account name"));
        }
        if to_address.trim().is_empty() {
            return Err(ValidationError::BlankField("destination address"));
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount);
        }
        Ok(Self {
            transaction_id,
            account_name,
            to_address,
            amount,
        })
    }
}

/// Inbound message accepted by the transaction worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    Transfer(Transfer),
    Withdrawal(WithdrawalRequest),
}

impl Transaction {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Transaction::Transfer(transfer) => &transfer.transaction_id,
            Transaction::Withdrawal(request) => &request.transaction_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Transaction::Transfer(transfer) => transfer.amount,
            Transaction::Withdrawal(request) => request.amount,
        }
    }
}

/// Provider-facing handle for a registered withdrawal, minted by this
/// system at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WithdrawalId(pub Uuid);

impl WithdrawalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable record of a withdrawal handed to the external provider.
/// Created at registration, status-mutated in place, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: WithdrawalId,
    pub transaction_id: TransactionId,
    pub account_name: String,
    pub to_address: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
}

/// Append-only status event; the latest report for a transaction id is
/// authoritative for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub message: String,
}

impl Report {
    pub fn new(
        transaction_id: TransactionId,
        amount: Decimal,
        status: TransactionStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id,
            amount,
            status,
            message: message.into(),
        }
    }
}
