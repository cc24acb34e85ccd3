use crate::models::{Report, Transaction, TransactionStatus, Transfer, WithdrawalRequest};
use crate::models::TransactionStatus::{Completed, Failed, Processing};
use crate::storage::{AccountStore, ReportLog};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Sequential loop applying transfers and withdrawal reservations to the
/// account store. Every inbound message yields exactly one report;
/// accepted withdrawal requests are handed off to the withdrawal worker.
pub struct TransactionWorker {
    accounts: Arc<dyn AccountStore>,
    reports: Arc<dyn ReportLog>,
    inbound: mpsc::Receiver<Transaction>,
    report_tx: mpsc::Sender<Report>,
    withdrawal_tx: mpsc::Sender<WithdrawalRequest>,
}

impl TransactionWorker {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        reports: Arc<dyn ReportLog>,
        inbound: mpsc::Receiver<Transaction>,
        report_tx: mpsc::Sender<Report>,
        withdrawal_tx: mpsc::Sender<WithdrawalRequest>,
    ) -> Self {
        Self {
            accounts,
            reports,
            inbound,
            report_tx,
            withdrawal_tx,
        }
    }

    /// Run until the inbound queue closes. A failing message never stalls
    /// the next one; each message owns its failure boundary.
    pub async fn run(mut self) {
        while let Some(message) = self.inbound.recv().await {
            match message {
                Transaction::Transfer(transfer) => self.process_transfer(transfer).await,
                Transaction::Withdrawal(request) => self.process_withdrawal_request(request).await,
            }
        }
        debug!("transaction worker stopped");
    }

    async fn process_transfer(&self, transfer: Transfer) {
        let (status, message) = self.apply_transfer(&transfer).await;
        let report = Report::new(
            transfer.transaction_id.clone(),
            transfer.amount,
            status,
            message,
        );
        self.emit(report).await;
    }

    async fn apply_transfer(&self, transfer: &Transfer) -> (TransactionStatus, String) {
        let mut from = match self.accounts.find_by_name(&transfer.from_account).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return (
                    Failed,
                    format!("Account not found: {}", transfer.from_account),
                )
            }
            Err(e) => return (Failed, format!("Transaction failed: {e}")),
        };
        let mut to = match self.accounts.find_by_name(&transfer.to_account).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return (
                    Failed,
                    format!("Account not found: {}", transfer.to_account),
                )
            }
            Err(e) => return (Failed, format!("Transaction failed: {e}")),
        };

        if from.balance < transfer.amount {
            return (Failed, "Insufficient funds".to_string());
        }

        from.balance -= transfer.amount;
        to.balance += transfer.amount;
        if let Err(e) = self.accounts.save(&from).await {
            return (Failed, format!("Transaction failed: {e}"));
        }
        if let Err(e) = self.accounts.save(&to).await {
            // The debit already landed; the cause goes into the report so
            // an operator can reconcile from the log.
            return (Failed, format!("Transaction failed: {e}"));
        }
        (Completed, "Transaction completed successfully".to_string())
    }

    async fn process_withdrawal_request(&self, request: WithdrawalRequest) {
        let (status, message) = self.reserve_funds(&request).await;
        let report = Report::new(
            request.transaction_id.clone(),
            request.amount,
            status,
            message,
        );
        self.emit(report).await;

        if status == Processing {
            if let Err(e) = self.withdrawal_tx.send(request).await {
                error!(error = %e, "withdrawal worker unavailable, request dropped");
            }
        }
    }

    async fn reserve_funds(&self, request: &WithdrawalRequest) -> (TransactionStatus, String) {
        let mut account = match self.accounts.find_by_name(&request.account_name).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return (
                    Failed,
                    format!("Account not found: {}", request.account_name),
                )
            }
            Err(e) => return (Failed, format!("Withdrawal failed: {e}")),
        };

        if account.balance < request.amount {
            return (Failed, "Insufficient funds".to_string());
        }

        // Move the amount from balance to reserve in a single write so the
        // same funds cannot be spent again while the withdrawal is in
        // flight.
        account.balance -= request.amount;
        account.reserve += request.amount;
        if let Err(e) = self.accounts.save(&account).await {
            return (Failed, format!("Withdrawal failed: {e}"));
        }
        (Processing, "Withdrawal initiated".to_string())
    }

    async fn emit(&self, report: Report) {
        if let Err(e) = self.reports.insert(&report).await {
            error!(
                transaction_id = %report.transaction_id.id,
                error = %e,
                "failed to persist report"
            );
        }
        if self.report_tx.send(report).await.is_err() {
            debug!("report channel closed");
        }
    }
}
