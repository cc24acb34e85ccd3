use crate::models::{Account, Report, TransactionStatus, Withdrawal, WithdrawalId};
use crate::storage::{AccountStore, ReportLog, WithdrawalStore};
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Append-only journal of JSON lines. Every write is flushed before the
/// in-memory view is updated, so replaying the file on open reproduces
/// the state a crashed process had persisted.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<File>,
}

impl Journal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Append one record as a JSON line.
    pub async fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Replay all records in insertion order.
    pub async fn replay<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let mut entries = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// Account store journaling every save; replay is last-writer-wins per
/// account name.
pub struct JournaledAccounts {
    journal: Journal,
    accounts: RwLock<HashMap<String, Account>>,
}

impl JournaledAccounts {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::open(path).await?;
        let mut accounts = HashMap::new();
        for account in journal.replay::<Account>().await? {
            accounts.insert(account.name.clone(), account);
        }
        Ok(Self {
            journal,
            accounts: RwLock::new(accounts),
        })
    }
}

#[async_trait]
impl AccountStore for JournaledAccounts {
    async fn find_by_name(&self, name: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(name).cloned())
    }

    async fn save(&self, account: &Account) -> Result<()> {
        self.journal.append(account).await?;
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.name.clone(), account.clone());
        Ok(())
    }
}

/// Withdrawal store journaling every save; replay is last-writer-wins per
/// withdrawal id, so a record's final status wins over its registration.
pub struct JournaledWithdrawals {
    journal: Journal,
    withdrawals: RwLock<HashMap<WithdrawalId, Withdrawal>>,
}

impl JournaledWithdrawals {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::open(path).await?;
        let mut withdrawals = HashMap::new();
        for withdrawal in journal.replay::<Withdrawal>().await? {
            withdrawals.insert(withdrawal.withdrawal_id, withdrawal);
        }
        Ok(Self {
            journal,
            withdrawals: RwLock::new(withdrawals),
        })
    }
}

#[async_trait]
impl WithdrawalStore for JournaledWithdrawals {
    async fn save(&self, withdrawal: &Withdrawal) -> Result<()> {
        self.journal.append(withdrawal).await?;
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

/// Report log journaling every insert; the journal itself is the log.
pub struct JournaledReports {
    journal: Journal,
    reports: RwLock<Vec<Report>>,
}

impl JournaledReports {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::open(path).await?;
        let reports = journal.replay::<Report>().await?;
        Ok(Self {
            journal,
            reports: RwLock::new(reports),
        })
    }
}

#[async_trait]
impl ReportLog for JournaledReports {
    async fn insert(&self, report: &Report) -> Result<()> {
        self.journal.append(report).await?;
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
