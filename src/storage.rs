use crate::models::{Account, Report, TransactionStatus, Withdrawal, WithdrawalId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable store of named accounts. `save` is an upsert keyed by name;
/// every mutation in the engines is a full read-modify-save cycle, so the
/// per-row replace here is the only serialization point.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Account>>;
    async fn save(&self, account: &Account) -> Result<()>;
}

/// Durable store of withdrawal records, keyed by withdrawal id.
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Idempotent replace-save keyed by withdrawal id.
    async fn save(&self, withdrawal: &Withdrawal) -> Result<()>;
    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Withdrawal>>;
    async fn find_by_transaction_id(&self, transaction_id: Uuid) -> Result<Option<Withdrawal>>;
}

/// Append-only log of status events. The engines only insert; the query
/// methods serve the report collaborator.
#[async_trait]
pub trait ReportLog: Send + Sync {
    async fn insert(&self, report: &Report) -> Result<()>;
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Report>>;
    async fn find_by_transaction(&self, transaction_id: Uuid) -> Result<Vec<Report>>;
    async fn find_latest_by_transaction(&self, transaction_id: Uuid) -> Result<Option<Report>>;
}

/// In-memory account store.
pub struct InMemoryAccounts {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAccounts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccounts {
    async fn find_by_name(&self, name: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(name).cloned())
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.name.clone(), account.clone());
        Ok(())
    }
}

/// In-memory withdrawal store.
pub struct InMemoryWithdrawals {
    withdrawals: Arc<RwLock<HashMap<WithdrawalId, Withdrawal>>>,
}

impl InMemoryWithdrawals {
    pub fn new() -> Self {
        Self {
            withdrawals: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryWithdrawals {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WithdrawalStore for InMemoryWithdrawals {
    async fn save(&self, withdrawal: &Withdrawal) -> Result<()> {
        let mut withdrawals = self.withdrawals.write().await;
        withdrawals.insert(withdrawal.withdrawal_id, withdrawal.clone());
        Ok(())
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Withdrawal>> {
        let withdrawals = self.withdrawals.read().await;
        Ok(withdrawals
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_transaction_id(&self, transaction_id: Uuid) -> Result<Option<Withdrawal>> {
        let withdrawals = self.withdrawals.read().await;
        Ok(withdrawals
            .values()
            .find(|w| w.transaction_id.id == transaction_id)
            .cloned())
    }
}

/// In-memory report log, ordered by insertion.
pub struct InMemoryReports {
    reports: Arc<RwLock<Vec<Report>>>,
}

impl InMemoryReports {
    pub fn new() -> Self {
        Self {
            reports: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryReports {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportLog for InMemoryReports {
    async fn insert(&self, report: &Report) -> Result<()> {
        let mut reports = self.reports.write().await;
        reports.push(report.clone());
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Report>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .filter(|r| r.transaction_id.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_by_transaction(&self, transaction_id: Uuid) -> Result<Vec<Report>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .filter(|r| r.transaction_id.id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_latest_by_transaction(&self, transaction_id: Uuid) -> Result<Option<Report>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .rev()
            .find(|r| r.transaction_id.id == transaction_id)
            .cloned())
    }
}
