use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use transfer_engine::provider::{ProviderState, StubProvider, WithdrawalProvider};
use transfer_engine::storage::{
    AccountStore, InMemoryAccounts, InMemoryReports, InMemoryWithdrawals, ReportLog,
    WithdrawalStore,
};
use transfer_engine::{
    Account, Engine, EngineConfig, ProviderError, Report, Transaction, TransactionId,
    TransactionStatus, Withdrawal, WithdrawalId, WithdrawalRequest,
};

struct Harness {
    engine: Engine,
    accounts: Arc<InMemoryAccounts>,
    withdrawals: Arc<InMemoryWithdrawals>,
    reports: Arc<InMemoryReports>,
}

async fn start_engine(balance: Decimal, provider: Arc<dyn WithdrawalProvider>) -> Harness {
    let accounts = Arc::new(InMemoryAccounts::new());
    accounts
        .save(&Account::new("User1", balance))
        .await
        .unwrap();
    let withdrawals = Arc::new(InMemoryWithdrawals::new());
    let reports = Arc::new(InMemoryReports::new());

    let engine = Engine::start(
        accounts.clone(),
        withdrawals.clone(),
        reports.clone(),
        provider,
        EngineConfig {
            queue_capacity: 16,
            poll_interval: Duration::from_millis(20),
        },
    );
    Harness {
        engine,
        accounts,
        withdrawals,
        reports,
    }
}

fn request(amount: Decimal) -> WithdrawalRequest {
    WithdrawalRequest::new(
        TransactionId::new("User1").unwrap(),
        "User1",
        "addr-1",
        amount,
    )
    .unwrap()
}

async fn next_report(engine: &mut Engine) -> Report {
    timeout(Duration::from_secs(5), engine.events.reports.recv())
        .await
        .expect("timed out waiting for report")
        .expect("report channel closed")
}

async fn next_withdrawal_event(engine: &mut Engine) -> Withdrawal {
    timeout(Duration::from_secs(5), engine.events.withdrawals.recv())
        .await
        .expect("timed out waiting for withdrawal event")
        .expect("withdrawal channel closed")
}

// ============================================================================
// RESERVATION AND SETTLEMENT
// ============================================================================

#[tokio::test]
async fn withdrawal_reserves_funds_then_completes() {
    let provider = Arc::new(StubProvider::settling_to(
        ProviderState::Completed,
        Duration::from_millis(400),
    ));
    let mut h = start_engine(dec!(1000), provider).await;

    let req = request(dec!(300));
    let transaction_id = req.transaction_id.id;
    h.engine
        .handle
        .submit(Transaction::Withdrawal(req))
        .await
        .unwrap();

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);
    assert_eq!(report.message, "Withdrawal initiated");

    // Reservation: funds leave the balance but stay on the account.
    let registered = next_withdrawal_event(&mut h.engine).await;
    assert_eq!(registered.status, TransactionStatus::Processing);
    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(700));
    assert_eq!(account.reserve, dec!(300));
    assert_eq!(account.total(), dec!(1000));

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Completed);
    assert_eq!(report.message, "Withdrawal completed");

    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(700));
    assert_eq!(account.reserve, dec!(0));

    let settled = next_withdrawal_event(&mut h.engine).await;
    assert_eq!(settled.status, TransactionStatus::Completed);
    let stored = h
        .withdrawals
        .find_by_transaction_id(transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn failed_settlement_refunds_the_reserve() {
    let provider = Arc::new(StubProvider::settling_to(
        ProviderState::Failed,
        Duration::from_millis(100),
    ));
    let mut h = start_engine(dec!(1000), provider).await;

    let req = request(dec!(300));
    let transaction_id = req.transaction_id.id;
    h.engine
        .handle
        .submit(Transaction::Withdrawal(req))
        .await
        .unwrap();

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Failed);
    assert_eq!(report.message, "Withdrawal failed");

    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(1000));
    assert_eq!(account.reserve, dec!(0));

    let stored = h
        .withdrawals
        .find_by_transaction_id(transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn insufficient_funds_rejects_the_withdrawal_outright() {
    let provider = Arc::new(StubProvider::settling_to(
        ProviderState::Completed,
        Duration::ZERO,
    ));
    let mut h = start_engine(dec!(50), provider).await;

    let req = request(dec!(300));
    let transaction_id = req.transaction_id.id;
    h.engine
        .handle
        .submit(Transaction::Withdrawal(req))
        .await
        .unwrap();

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Failed);
    assert_eq!(report.message, "Insufficient funds");

    // Nothing was forwarded: no withdrawal row ever appears.
    sleep(Duration::from_millis(100)).await;
    assert!(h
        .withdrawals
        .find_by_transaction_id(transaction_id)
        .await
        .unwrap()
        .is_none());
    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(50));
    assert_eq!(account.reserve, dec!(0));
}

#[tokio::test]
async fn reservation_conserves_balance_plus_reserve() {
    // Settlement far in the future: the withdrawal stays in flight.
    let provider = Arc::new(StubProvider::settling_to(
        ProviderState::Completed,
        Duration::from_secs(3600),
    ));
    let mut h = start_engine(dec!(1000), provider).await;

    h.engine
        .handle
        .submit(Transaction::Withdrawal(request(dec!(300))))
        .await
        .unwrap();
    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);

    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.total(), dec!(1000));

    // Several reconciliation passes later it is still in flight and has
    // produced no further report.
    sleep(Duration::from_millis(150)).await;
    let pending = h
        .withdrawals
        .find_by_status(TransactionStatus::Processing)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let report_count = h
        .reports
        .find_by_user("User1")
        .await
        .unwrap()
        .len();
    assert_eq!(report_count, 1);
}

#[tokio::test]
async fn terminal_withdrawal_is_never_touched_again() {
    let provider = Arc::new(StubProvider::settling_to(
        ProviderState::Completed,
        Duration::ZERO,
    ));
    let mut h = start_engine(dec!(1000), provider).await;

    let req = request(dec!(300));
    let transaction_id = req.transaction_id.id;
    h.engine
        .handle
        .submit(Transaction::Withdrawal(req))
        .await
        .unwrap();

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);
    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Completed);

    let settled = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(settled.balance, dec!(700));
    assert_eq!(settled.reserve, dec!(0));

    // Many reconciliation passes later: same account state, exactly one
    // PROCESSING and one COMPLETED report, no double release.
    sleep(Duration::from_millis(200)).await;
    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account, settled);
    let logged = h.reports.find_by_transaction(transaction_id).await.unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].status, TransactionStatus::Processing);
    assert_eq!(logged[1].status, TransactionStatus::Completed);
}

// ============================================================================
// PROVIDER FAILURE MODES
// ============================================================================

/// Accepts registrations but has no memory of them when polled.
struct ForgetfulProvider;

#[async_trait]
impl WithdrawalProvider for ForgetfulProvider {
    async fn request_withdrawal(
        &self,
        _id: WithdrawalId,
        _address: &str,
        _amount: Decimal,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_request_state(&self, id: WithdrawalId) -> Result<ProviderState, ProviderError> {
        Err(ProviderError::UnknownWithdrawal(id))
    }
}

#[tokio::test]
async fn unknown_provider_id_fails_the_withdrawal_with_refund() {
    let mut h = start_engine(dec!(1000), Arc::new(ForgetfulProvider)).await;

    h.engine
        .handle
        .submit(Transaction::Withdrawal(request(dec!(300))))
        .await
        .unwrap();
    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);

    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Failed);
    assert!(report.message.contains("not known to the provider"));

    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(1000));
    assert_eq!(account.reserve, dec!(0));
}

/// Registration works, polling is down.
struct UnreachableOnPoll;

#[async_trait]
impl WithdrawalProvider for UnreachableOnPoll {
    async fn request_withdrawal(
        &self,
        _id: WithdrawalId,
        _address: &str,
        _amount: Decimal,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_request_state(&self, _id: WithdrawalId) -> Result<ProviderState, ProviderError> {
        Err(ProviderError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn provider_outage_leaves_the_withdrawal_in_flight() {
    let mut h = start_engine(dec!(1000), Arc::new(UnreachableOnPoll)).await;

    h.engine
        .handle
        .submit(Transaction::Withdrawal(request(dec!(300))))
        .await
        .unwrap();
    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);

    sleep(Duration::from_millis(200)).await;
    let pending = h
        .withdrawals
        .find_by_status(TransactionStatus::Processing)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(700));
    assert_eq!(account.reserve, dec!(300));
    // Still exactly the one PROCESSING report.
    assert_eq!(h.reports.find_by_user("User1").await.unwrap().len(), 1);
}

/// Refuses every registration.
struct RejectingProvider;

#[async_trait]
impl WithdrawalProvider for RejectingProvider {
    async fn request_withdrawal(
        &self,
        _id: WithdrawalId,
        _address: &str,
        _amount: Decimal,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable("maintenance".into()))
    }

    async fn get_request_state(&self, id: WithdrawalId) -> Result<ProviderState, ProviderError> {
        Err(ProviderError::UnknownWithdrawal(id))
    }
}

#[tokio::test]
async fn failed_registration_leaves_reserved_funds_and_no_row() {
    let mut h = start_engine(dec!(1000), Arc::new(RejectingProvider)).await;

    let req = request(dec!(300));
    let transaction_id = req.transaction_id.id;
    h.engine
        .handle
        .submit(Transaction::Withdrawal(req))
        .await
        .unwrap();
    let report = next_report(&mut h.engine).await;
    assert_eq!(report.status, TransactionStatus::Processing);

    // No withdrawal row is created and no retry happens; the reservation
    // stays put for operator replay.
    sleep(Duration::from_millis(150)).await;
    assert!(h
        .withdrawals
        .find_by_transaction_id(transaction_id)
        .await
        .unwrap()
        .is_none());
    let account = h.accounts.find_by_name("User1").await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(700));
    assert_eq!(account.reserve, dec!(300));
    assert_eq!(h.reports.find_by_user("User1").await.unwrap().len(), 1);
}

// ============================================================================
// PROVIDER STUB CONTRACT
// ============================================================================

#[tokio::test]
async fn stub_registration_is_idempotent_for_identical_parameters() {
    let provider = StubProvider::settling_to(ProviderState::Completed, Duration::ZERO);
    let id = WithdrawalId::new();

    provider
        .request_withdrawal(id, "addr-1", dec!(10))
        .await
        .unwrap();
    provider
        .request_withdrawal(id, "addr-1", dec!(10))
        .await
        .unwrap();
}

#[tokio::test]
async fn stub_rejects_reregistration_with_different_parameters() {
    let provider = StubProvider::settling_to(ProviderState::Completed, Duration::ZERO);
    let id = WithdrawalId::new();

    provider
        .request_withdrawal(id, "addr-1", dec!(10))
        .await
        .unwrap();
    let err = provider
        .request_withdrawal(id, "addr-1", dec!(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::ParameterMismatch(_)));
}

#[tokio::test]
async fn stub_fails_distinctly_for_unknown_ids() {
    let provider = StubProvider::settling_to(ProviderState::Completed, Duration::ZERO);
    let err = provider
        .get_request_state(WithdrawalId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::UnknownWithdrawal(_)));
}

#[tokio::test]
async fn stub_stays_in_flight_until_the_settlement_delay_elapses() {
    let provider = StubProvider::settling_to(ProviderState::Completed, Duration::from_millis(60));
    let id = WithdrawalId::new();
    provider
        .request_withdrawal(id, "addr-1", dec!(10))
        .await
        .unwrap();

    assert_eq!(
        provider.get_request_state(id).await.unwrap(),
        ProviderState::Processing
    );
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        provider.get_request_state(id).await.unwrap(),
        ProviderState::Completed
    );
}
