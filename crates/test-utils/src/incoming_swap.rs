//! A recording incoming swap service.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use wallet_service_proto::{IncomingSwapService, ServiceError};
use wallet_signer::{FulfillmentData, PREIMAGE_LEN};

/// A call received by [`FakeIncomingSwapService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingSwapCall {
    /// Fulfillment data requested for a swap.
    FetchFulfillmentData(String),

    /// A signed claim pushed for a swap, as raw transaction hex.
    PushTransaction(String, String),

    /// A full-debt swap settled with its preimage.
    Fulfill(String, [u8; PREIMAGE_LEN]),

    /// An invoice expired, by payment hash hex.
    ExpireInvoice(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<IncomingSwapCall>,
    fulfillment_data: Option<FulfillmentData>,
    next_failure: Option<ServiceError>,
}

/// Records calls and answers them successfully unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeIncomingSwapService {
    state: Mutex<State>,
}

impl FakeIncomingSwapService {
    /// A service with no fulfillment data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers fulfillment data requests with `data`.
    pub fn set_fulfillment_data(&self, data: FulfillmentData) {
        self.state().fulfillment_data = Some(data);
    }

    /// Makes the next call of any kind fail with `error`. The call is still recorded.
    pub fn fail_next_call(&self, error: ServiceError) {
        self.state().next_failure = Some(error);
    }

    /// Calls received, in order.
    pub fn calls(&self) -> Vec<IncomingSwapCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: IncomingSwapCall) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.push(call);
        state.next_failure.take().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl IncomingSwapService for FakeIncomingSwapService {
    async fn fetch_fulfillment_data(&self, uuid: &str) -> Result<FulfillmentData, ServiceError> {
        self.record(IncomingSwapCall::FetchFulfillmentData(uuid.to_string()))?;
        self.state()
            .fulfillment_data
            .clone()
            .ok_or_else(|| ServiceError::Default(format!("no fulfillment data for {uuid}")))
    }

    async fn push_fulfillment_transaction(
        &self,
        uuid: &str,
        raw_transaction_hex: &str,
    ) -> Result<(), ServiceError> {
        self.record(IncomingSwapCall::PushTransaction(
            uuid.to_string(),
            raw_transaction_hex.to_string(),
        ))
    }

    async fn fulfill(
        &self,
        uuid: &str,
        preimage: &[u8; PREIMAGE_LEN],
    ) -> Result<(), ServiceError> {
        self.record(IncomingSwapCall::Fulfill(uuid.to_string(), *preimage))
    }

    async fn expire_invoice(&self, payment_hash_hex: &str) -> Result<(), ServiceError> {
        self.record(IncomingSwapCall::ExpireInvoice(payment_hash_hex.to_string()))
    }
}
