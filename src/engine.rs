use crate::errors::EngineError;
use crate::models::{Report, Transaction, Withdrawal};
use crate::provider::WithdrawalProvider;
use crate::storage::{AccountStore, ReportLog, WithdrawalStore};
use crate::transaction_worker::TransactionWorker;
use crate::withdrawal_worker::WithdrawalWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Queue sizing and the reconciliation tick.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of each in-memory queue; senders block when full.
    pub queue_capacity: usize,
    /// Bounded wait on the withdrawal queue. Every idle timeout runs one
    /// reconciliation pass over in-flight withdrawals.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Submission side of the engine. Cloneable; the workers exit once every
/// handle is dropped and the queues drain.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Transaction>,
}

impl EngineHandle {
    /// Enqueue a transfer or withdrawal request. Blocks while the queue
    /// is full; the outcome surfaces as a report, never as a return value.
    pub async fn submit(&self, transaction: Transaction) -> Result<(), EngineError> {
        self.sender
            .send(transaction)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }
}

/// Outbound event streams: one report per processed message, plus every
/// withdrawal state transition for the report/query collaborator.
pub struct EngineEvents {
    pub reports: mpsc::Receiver<Report>,
    pub withdrawals: mpsc::Receiver<Withdrawal>,
}

pub struct Engine {
    pub handle: EngineHandle,
    pub events: EngineEvents,
}

impl Engine {
    /// Wire the queues and spawn the two worker loops.
    pub fn start(
        accounts: Arc<dyn AccountStore>,
        withdrawals: Arc<dyn WithdrawalStore>,
        reports: Arc<dyn ReportLog>,
        provider: Arc<dyn WithdrawalProvider>,
        config: EngineConfig,
    ) -> Self {
        let (transaction_tx, transaction_rx) = mpsc::channel(config.queue_capacity);
        let (report_tx, report_rx) = mpsc::channel(config.queue_capacity);
        let (withdrawal_tx, withdrawal_rx) = mpsc::channel(config.queue_capacity);
        let (status_tx, status_rx) = mpsc::channel(config.queue_capacity);

        let transaction_worker = TransactionWorker::new(
            accounts.clone(),
            reports.clone(),
            transaction_rx,
            report_tx.clone(),
            withdrawal_tx,
        );
        let withdrawal_worker = WithdrawalWorker::new(
            accounts,
            withdrawals,
            reports,
            provider,
            withdrawal_rx,
            report_tx,
            status_tx,
            config.poll_interval,
        );

        tokio::spawn(transaction_worker.run());
        tokio::spawn(withdrawal_worker.run());

        Engine {
            handle: EngineHandle {
                sender: transaction_tx,
            },
            events: EngineEvents {
                reports: report_rx,
                withdrawals: status_rx,
            },
        }
    }
}
