use crate::errors::ProviderError;
use crate::models::WithdrawalId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Settlement state reported by the external provider for a registered
/// withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Processing,
    Completed,
    Failed,
}

/// Two-operation contract of the external settlement provider. There is
/// no push notification; callers poll `get_request_state` until terminal.
#[async_trait]
pub trait WithdrawalProvider: Send + Sync {
    /// Register a withdrawal under an id minted by the caller. Repeating
    /// the call with identical address and amount is not an error; a
    /// repeat with differing parameters is rejected.
    async fn request_withdrawal(
        &self,
        id: WithdrawalId,
        address: &str,
        amount: Decimal,
    ) -> Result<(), ProviderError>;

    /// Poll the settlement state. Fails distinctly when the id was never
    /// registered.
    async fn get_request_state(&self, id: WithdrawalId) -> Result<ProviderState, ProviderError>;
}

struct StubRequest {
    address: String,
    amount: Decimal,
    final_state: ProviderState,
    settles_at: Instant,
}

impl StubRequest {
    fn state(&self) -> ProviderState {
        if Instant::now() >= self.settles_at {
            self.final_state
        } else {
            ProviderState::Processing
        }
    }
}

/// In-process provider: each registration stays in flight for
/// `settle_after`, then reports a fixed terminal state (or one derived
/// from the id when none is configured).
pub struct StubProvider {
    requests: RwLock<HashMap<WithdrawalId, StubRequest>>,
    settle_after: Duration,
    outcome: Option<ProviderState>,
}

impl StubProvider {
    /// Outcome picked per withdrawal id.
    pub fn new(settle_after: Duration) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            settle_after,
            outcome: None,
        }
    }

    /// Every withdrawal settles to `outcome` once `settle_after` elapses.
    pub fn settling_to(outcome: ProviderState, settle_after: Duration) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            settle_after,
            outcome: Some(outcome),
        }
    }

    fn final_state_for(&self, id: WithdrawalId) -> ProviderState {
        match self.outcome {
            Some(state) => state,
            None => {
                if id.0.as_bytes()[15] % 2 == 0 {
                    ProviderState::Completed
                } else {
                    ProviderState::Failed
                }
            }
        }
    }
}

#[async_trait]
impl WithdrawalProvider for StubProvider {
    async fn request_withdrawal(
        &self,
        id: WithdrawalId,
        address: &str,
        amount: Decimal,
    ) -> Result<(), ProviderError> {
        let mut requests = self.requests.write().await;
        if let Some(existing) = requests.get(&id) {
            if existing.address != address || existing.amount != amount {
                return Err(ProviderError::ParameterMismatch(id));
            }
            // Identical repeat of an earlier registration.
            return Ok(());
        }
        requests.insert(
            id,
            StubRequest {
                address: address.to_string(),
                amount,
                final_state: self.final_state_for(id),
                settles_at: Instant::now() + self.settle_after,
            },
        );
        Ok(())
    }

    async fn get_request_state(&self, id: WithdrawalId) -> Result<ProviderState, ProviderError> {
        let requests = self.requests.read().await;
        let request = requests
            .get(&id)
            .ok_or(ProviderError::UnknownWithdrawal(id))?;
        Ok(request.state())
    }
}
