use crate::engine::{Engine, EngineConfig, EngineHandle};
use crate::journal::{JournaledAccounts, JournaledReports, JournaledWithdrawals};
use crate::models::{Transaction, TransactionId, Transfer, WithdrawalRequest};
use crate::provider::{StubProvider, WithdrawalProvider};
use crate::storage::{AccountStore, ReportLog, WithdrawalStore};
use anyhow::Result;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// TCP line-protocol front end over the engine. One command per line:
///
/// ```text
/// TRANSFER <from> <to> <amount>
/// WITHDRAW <account> <address> <amount>
/// REPORT <transaction-id>
/// REPORTS <user>
/// ```
///
/// Submissions answer `OK <transaction-id>`; the terminal outcome is
/// queried with `REPORT`. Malformed input is rejected here, before it
/// reaches the engine queues.
pub async fn run(
    bind: String,
    data_dir: PathBuf,
    poll_interval: Duration,
    max_connections: usize,
) -> Result<()> {
    tokio::fs::create_dir_all(&data_dir).await?;
    let accounts: Arc<dyn AccountStore> =
        Arc::new(JournaledAccounts::open(data_dir.join("accounts.log")).await?);
    let withdrawals: Arc<dyn WithdrawalStore> =
        Arc::new(JournaledWithdrawals::open(data_dir.join("withdrawals.log")).await?);
    let reports: Arc<dyn ReportLog> =
        Arc::new(JournaledReports::open(data_dir.join("reports.log")).await?);
    let provider: Arc<dyn WithdrawalProvider> =
        Arc::new(StubProvider::new(Duration::from_secs(5)));

    let engine = Engine::start(
        accounts,
        withdrawals,
        reports.clone(),
        provider,
        EngineConfig {
            poll_interval,
            ..EngineConfig::default()
        },
    );
    let handle = engine.handle.clone();

    // Reports and withdrawal transitions are already persisted by the
    // workers; the outbound streams only feed the log here.
    let mut events = engine.events;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                report = events.reports.recv() => match report {
                    Some(report) => tracing::info!(
                        transaction_id = %report.transaction_id.id,
                        status = %report.status,
                        message = %report.message,
                        "report"
                    ),
                    None => break,
                },
                withdrawal = events.withdrawals.recv() => match withdrawal {
                    Some(withdrawal) => tracing::debug!(
                        withdrawal_id = %withdrawal.withdrawal_id,
                        status = %withdrawal.status,
                        "withdrawal event"
                    ),
                    None => break,
                },
            }
        }
    });

    let listener = TcpListener::bind(&bind).await?;
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tracing::info!("listening on {}, max {} connections", bind, max_connections);

    loop {
        let permit = semaphore.clone().acquire_owned().await?;
        let (socket, addr) = listener.accept().await?;
        tracing::debug!("accepted connection from {}", addr);

        let handle = handle.clone();
        let reports = reports.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, handle, reports).await {
                tracing::error!("connection {} error: {}", addr, e);
            }
            drop(permit);
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    handle: EngineHandle,
    reports: Arc<dyn ReportLog>,
) -> Result<()> {
    let (reader, writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match dispatch(&line, &handle, reports.as_ref()).await {
            Ok(response) => response,
            Err(e) => format!("ERR {e}"),
        };
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn dispatch(line: &str, handle: &EngineHandle, reports: &dyn ReportLog) -> Result<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["TRANSFER", from, to, amount] => {
            let amount: Decimal = amount.parse()?;
            let transfer = Transfer::new(TransactionId::new(*from)?, *from, *to, amount)?;
            let id = transfer.transaction_id.id;
            handle.submit(Transaction::Transfer(transfer)).await?;
            Ok(format!("OK {id}"))
        }
        ["WITHDRAW", account, address, amount] => {
            let amount: Decimal = amount.parse()?;
            let request =
                WithdrawalRequest::new(TransactionId::new(*account)?, *account, *address, amount)?;
            let id = request.transaction_id.id;
            handle.submit(Transaction::Withdrawal(request)).await?;
            Ok(format!("OK {id}"))
        }
        ["REPORT", id] => {
            let id = Uuid::parse_str(id)?;
            match reports.find_latest_by_transaction(id).await? {
                Some(report) => Ok(format!("{} {}", report.status, report.message)),
                None => Ok("NOT_FOUND".to_string()),
            }
        }
        ["REPORTS", user] => {
            let found = reports.find_by_user(user).await?;
            if found.is_empty() {
                return Ok("NOT_FOUND".to_string());
            }
            let lines: Vec<String> = found
                .iter()
                .map(|r| format!("{} {} {}", r.transaction_id.id, r.status, r.message))
                .collect();
            Ok(lines.join("; "))
        }
        _ => anyhow::bail!("unsupported command"),
    }
}
