use crate::errors::ProviderError;
use crate::models::TransactionStatus::{Completed, Failed, Processing};
use crate::models::{Report, TransactionStatus, Withdrawal, WithdrawalId, WithdrawalRequest};
use crate::provider::{ProviderState, WithdrawalProvider};
use crate::storage::{AccountStore, ReportLog, WithdrawalStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Registers accepted withdrawal requests with the external provider and
/// re-polls every persisted in-flight withdrawal until it settles. The
/// bounded wait on the inbound queue doubles as the scheduling tick: each
/// idle timeout runs one reconciliation pass.
pub struct WithdrawalWorker {
    accounts: Arc<dyn AccountStore>,
    withdrawals: Arc<dyn WithdrawalStore>,
    reports: Arc<dyn ReportLog>,
    provider: Arc<dyn WithdrawalProvider>,
    inbound: mpsc::Receiver<WithdrawalRequest>,
    report_tx: mpsc::Sender<Report>,
    status_tx: mpsc::Sender<Withdrawal>,
    poll_interval: Duration,
}

impl WithdrawalWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        withdrawals: Arc<dyn WithdrawalStore>,
        reports: Arc<dyn ReportLog>,
        provider: Arc<dyn WithdrawalProvider>,
        inbound: mpsc::Receiver<WithdrawalRequest>,
        report_tx: mpsc::Sender<Report>,
        status_tx: mpsc::Sender<Withdrawal>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            accounts,
            withdrawals,
            reports,
            provider,
            inbound,
            report_tx,
            status_tx,
            poll_interval,
        }
    }

    /// Run until the inbound queue closes.
    pub async fn run(mut self) {
        loop {
            match timeout(self.poll_interval, self.inbound.recv()).await {
                Ok(Some(request)) => self.register(request).await,
                Ok(None) => break,
                Err(_) => self.reconcile().await,
            }
        }
        debug!("withdrawal worker stopped");
    }

    /// Mint a withdrawal id and hand the request to the provider. Funds
    /// were already reserved by the transaction worker; a registration
    /// failure leaves no withdrawal row behind and is escalated through
    /// the error log for out-of-band replay.
    async fn register(&self, request: WithdrawalRequest) {
        let withdrawal_id = WithdrawalId::new();
        if let Err(e) = self
            .provider
            .request_withdrawal(withdrawal_id, &request.to_address, request.amount)
            .await
        {
            error!(
                withdrawal_id = %withdrawal_id,
                transaction_id = %request.transaction_id.id,
                error = %e,
                "withdrawal registration failed, reserved funds need operator replay"
            );
            return;
        }

        let withdrawal = Withdrawal {
            withdrawal_id,
            transaction_id: request.transaction_id,
            account_name: request.account_name,
            to_address: request.to_address,
            amount: request.amount,
            status: Processing,
        };
        if let Err(e) = self.withdrawals.save(&withdrawal).await {
            // Registered at the provider but not recorded locally: no
            // reconciliation pass will ever see this id.
            error!(
                withdrawal_id = %withdrawal_id,
                transaction_id = %withdrawal.transaction_id.id,
                error = %e,
                "failed to persist registered withdrawal"
            );
            return;
        }
        info!(
            withdrawal_id = %withdrawal_id,
            amount = %withdrawal.amount,
            "withdrawal registered"
        );
        if self.status_tx.send(withdrawal).await.is_err() {
            debug!("withdrawal status channel closed");
        }
    }

    /// One pass over every in-flight withdrawal. The rows are loaded fresh
    /// from the store each pass, so a restarted process simply resumes
    /// polling whatever was persisted.
    async fn reconcile(&self) {
        let pending = match self.withdrawals.find_by_status(Processing).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "could not load in-flight withdrawals, will retry");
                return;
            }
        };
        for withdrawal in pending {
            self.check(withdrawal).await;
        }
    }

    async fn check(&self, withdrawal: Withdrawal) {
        match self
            .provider
            .get_request_state(withdrawal.withdrawal_id)
            .await
        {
            Ok(ProviderState::Processing) => {}
            Ok(ProviderState::Completed) => {
                self.finalize(withdrawal, Completed, "Withdrawal completed".to_string())
                    .await;
            }
            Ok(ProviderState::Failed) => {
                self.finalize(withdrawal, Failed, "Withdrawal failed".to_string())
                    .await;
            }
            Err(e @ ProviderError::UnknownWithdrawal(_)) => {
                // An unregistered id can never settle; fail it and refund.
                self.finalize(withdrawal, Failed, format!("Withdrawal failed: {e}"))
                    .await;
            }
            Err(e) => {
                warn!(
                    withdrawal_id = %withdrawal.withdrawal_id,
                    error = %e,
                    "provider poll failed, will retry"
                );
            }
        }
    }

    /// Apply a terminal outcome: release the reserve on completion (the
    /// funds left the balance at reservation time), refund it on failure,
    /// then persist the final status and emit.
    async fn finalize(&self, mut withdrawal: Withdrawal, status: TransactionStatus, message: String) {
        if withdrawal.status.is_terminal() {
            return;
        }

        let mut account = match self.accounts.find_by_name(&withdrawal.account_name).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                error!(
                    account = %withdrawal.account_name,
                    withdrawal_id = %withdrawal.withdrawal_id,
                    "account missing for settled withdrawal"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, "account load failed, withdrawal stays in flight");
                return;
            }
        };
        match status {
            Completed => {
                account.reserve -= withdrawal.amount;
            }
            Failed => {
                account.balance += withdrawal.amount;
                account.reserve -= withdrawal.amount;
            }
            Processing => unreachable!("finalize only takes terminal statuses"),
        }
        if let Err(e) = self.accounts.save(&account).await {
            warn!(error = %e, "account save failed, withdrawal stays in flight");
            return;
        }

        withdrawal.status = status;
        if let Err(e) = self.withdrawals.save(&withdrawal).await {
            // The account adjustment is already durable; until this row is
            // marked terminal the next pass would apply it again.
            error!(
                withdrawal_id = %withdrawal.withdrawal_id,
                error = %e,
                "failed to persist terminal withdrawal status"
            );
            return;
        }
        info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            status = %status,
            "withdrawal settled"
        );

        let report = Report::new(
            withdrawal.transaction_id.clone(),
            withdrawal.amount,
            status,
            message,
        );
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
        if self.status_tx.send(withdrawal).await.is_err() {
            debug!("withdrawal status channel closed");
        }
    }
}
