//! Claiming incoming swaps against the coordination service.

use std::{fmt, sync::Arc};

use bitcoin::{consensus::encode::serialize_hex, Network};
use tracing::{error, info, warn};
use wallet_service_proto::{
    ExactDeveloperError, IncomingSwapService, InvoiceSecretStore, KeyStorage, ServiceError,
};
use wallet_signer::{Fulfillment, IncomingSwap};

use crate::FulfillActionError;

/// How a fulfill run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillOutcome {
    /// The swap was claimed by this run.
    Fulfilled(Fulfillment),

    /// The service already had the swap fulfilled.
    AlreadyFulfilled,
}

/// Fulfills incoming swaps: settles full-debt swaps with the preimage and claims the HTLC of the
/// others.
pub struct FulfillIncomingSwapAction {
    network: Network,
    storage: Arc<dyn KeyStorage>,
    secrets: Arc<dyn InvoiceSecretStore>,
    service: Arc<dyn IncomingSwapService>,
}

impl fmt::Debug for FulfillIncomingSwapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillIncomingSwapAction")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl FulfillIncomingSwapAction {
    /// Creates the action.
    pub fn new(
        network: Network,
        storage: Arc<dyn KeyStorage>,
        secrets: Arc<dyn InvoiceSecretStore>,
        service: Arc<dyn IncomingSwapService>,
    ) -> Self {
        Self {
            network,
            storage,
            secrets,
            service,
        }
    }

    /// Fulfills `swap` at chain height `current_height`.
    ///
    /// Swaps the wallet cannot claim safely get their invoice expired so the payer is refunded.
    pub async fn run(
        &self,
        swap: &IncomingSwap,
        current_height: u32,
    ) -> Result<FulfillOutcome, FulfillActionError> {
        let payment_hash = hex::encode(swap.payment_hash);

        let Some(secret) = self.secrets.invoice_secret(&swap.payment_hash).await? else {
            error!(uuid = %swap.uuid, %payment_hash, "no invoice secret for incoming swap");
            self.expire_invoice(&payment_hash).await;
            return Err(FulfillActionError::UnknownInvoice(payment_hash));
        };

        let user_key = self.storage.base_private_key().await?;
        let muun_base = self.storage.cosigning_key().await?;

        if let Err(e) =
            swap.verify_fulfillable(&secret, &user_key.public_key(), &muun_base, current_height)
        {
            self.expire_invoice(&payment_hash).await;
            return Err(FulfillActionError::Unfulfillable(e));
        }

        let fulfillment = if swap.is_full_debt() {
            swap.fulfill_full_debt(&secret)?
        } else {
            let data = self.service.fetch_fulfillment_data(&swap.uuid).await?;
            swap.fulfill(
                &data,
                &secret,
                &user_key,
                &muun_base,
                current_height,
                self.network,
            )?
        };
        drop(user_key);

        match self.push(&swap.uuid, &fulfillment).await {
            Ok(()) => {
                self.secrets
                    .record_fulfillment(&swap.uuid, &fulfillment)
                    .await?;
                Ok(FulfillOutcome::Fulfilled(fulfillment))
            }
            Err(e) if e.is_kind_of(ExactDeveloperError::IncomingSwapAlreadyFulfilled) => {
                info!(uuid = %swap.uuid, "incoming swap was already fulfilled");
                Ok(FulfillOutcome::AlreadyFulfilled)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Hands the claim to the service: the signed transaction, or the preimage alone for debt
    /// settlements.
    async fn push(&self, uuid: &str, fulfillment: &Fulfillment) -> Result<(), ServiceError> {
        match fulfillment.transaction() {
            Some(tx) => {
                self.service
                    .push_fulfillment_transaction(uuid, &serialize_hex(tx))
                    .await?;
                info!(%uuid, txid = %tx.compute_txid(), "pushed incoming swap claim");
            }
            None => {
                self.service.fulfill(uuid, fulfillment.preimage()).await?;
                info!(%uuid, "settled incoming swap against debt");
            }
        }
        Ok(())
    }

    async fn expire_invoice(&self, payment_hash: &str) {
        if let Err(error) = self.service.expire_invoice(payment_hash).await {
            warn!(%payment_hash, %error, "could not expire invoice");
        }
    }
}

#[cfg(test)]
mod tests {
    use wallet_db::inmemory::prelude::{InvoiceSecretStoreInMemory, KeyStorageInMemory};
    use wallet_service_proto::DeveloperError;
    use wallet_test_utils::{fixtures, FakeIncomingSwapService, IncomingSwapCall};

    use super::*;

    struct Setup {
        secrets: InvoiceSecretStoreInMemory,
        service: Arc<FakeIncomingSwapService>,
        action: FulfillIncomingSwapAction,
    }

    async fn setup() -> Setup {
        wallet_test_utils::init_test_logging();
        let storage = Arc::new(KeyStorageInMemory::new(fixtures::NETWORK));
        storage
            .store_base_private_key(&fixtures::user_base_key())
            .await
            .unwrap();
        storage
            .store_cosigning_key(&fixtures::muun_base_key().public_key())
            .await
            .unwrap();

        let secrets = InvoiceSecretStoreInMemory::default();
        secrets
            .store_invoice_secrets(&[fixtures::invoice_secret()])
            .await
            .unwrap();
        let service = Arc::new(FakeIncomingSwapService::new());
        let action = FulfillIncomingSwapAction::new(
            fixtures::NETWORK,
            storage,
            Arc::new(secrets.clone()),
            service.clone(),
        );

        Setup {
            secrets,
            service,
            action,
        }
    }

    fn already_fulfilled() -> ServiceError {
        ServiceError::Developer(DeveloperError {
            error_code: 2074,
            message: "already fulfilled".to_string(),
            developer_message: None,
            request_id: 1,
            status: 409,
        })
    }

    #[tokio::test]
    async fn claims_the_htlc_and_pushes_the_transaction() {
        let s = setup().await;
        let swap = fixtures::incoming_swap();
        s.service
            .set_fulfillment_data(fixtures::fulfillment_data(&swap));

        let outcome = s.action.run(&swap, fixtures::CURRENT_HEIGHT).await.unwrap();

        let FulfillOutcome::Fulfilled(fulfillment) = outcome else {
            panic!("expected a fulfillment");
        };
        let tx = fulfillment.transaction().unwrap();
        assert_eq!(fulfillment.preimage(), fixtures::invoice_secret().preimage());
        assert_eq!(
            s.service.calls(),
            vec![
                IncomingSwapCall::FetchFulfillmentData(swap.uuid.clone()),
                IncomingSwapCall::PushTransaction(swap.uuid.clone(), serialize_hex(tx)),
            ]
        );
        assert_eq!(
            s.secrets.fulfillment(&swap.uuid).await.unwrap(),
            Some(fulfillment.clone())
        );
        assert_eq!(swap.fulfillment(), Some(fulfillment));
    }

    #[tokio::test]
    async fn full_debt_swaps_reveal_the_preimage() {
        let s = setup().await;
        let swap = fixtures::full_debt_swap();

        let outcome = s.action.run(&swap, fixtures::CURRENT_HEIGHT).await.unwrap();

        assert!(matches!(
            &outcome,
            FulfillOutcome::Fulfilled(f) if f.transaction().is_none()
        ));
        assert_eq!(
            s.service.calls(),
            vec![IncomingSwapCall::Fulfill(
                swap.uuid.clone(),
                *fixtures::invoice_secret().preimage()
            )]
        );
    }

    #[tokio::test]
    async fn unknown_invoices_are_expired() {
        let s = setup().await;
        let mut swap = fixtures::full_debt_swap();
        swap.payment_hash = [9u8; 32];

        let err = s.action.run(&swap, fixtures::CURRENT_HEIGHT).await.unwrap_err();

        let payment_hash = hex::encode([9u8; 32]);
        assert!(matches!(&err, FulfillActionError::UnknownInvoice(hash) if *hash == payment_hash));
        assert_eq!(
            s.service.calls(),
            vec![IncomingSwapCall::ExpireInvoice(payment_hash)]
        );
    }

    #[tokio::test]
    async fn expiring_htlcs_are_not_claimed() {
        let s = setup().await;
        let swap = fixtures::incoming_swap();
        let too_late = fixtures::HTLC_EXPIRATION_HEIGHT - 1;

        let err = s.action.run(&swap, too_late).await.unwrap_err();

        assert!(matches!(err, FulfillActionError::Unfulfillable(_)));
        assert_eq!(
            s.service.calls(),
            vec![IncomingSwapCall::ExpireInvoice(hex::encode(swap.payment_hash))]
        );
        assert_eq!(swap.fulfillment(), None);
    }

    #[tokio::test]
    async fn already_fulfilled_swaps_count_as_done() {
        let s = setup().await;
        let swap = fixtures::full_debt_swap();
        s.service.fail_next_call(already_fulfilled());

        let outcome = s.action.run(&swap, fixtures::CURRENT_HEIGHT).await.unwrap();

        assert_eq!(outcome, FulfillOutcome::AlreadyFulfilled);
        assert_eq!(s.secrets.fulfillment(&swap.uuid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn other_service_errors_surface() {
        let s = setup().await;
        let swap = fixtures::incoming_swap();
        s.service.fail_next_call(ServiceError::Timeout);

        let err = s.action.run(&swap, fixtures::CURRENT_HEIGHT).await.unwrap_err();

        assert!(matches!(err, FulfillActionError::Service(ServiceError::Timeout)));
        assert_eq!(s.secrets.fulfillment(&swap.uuid).await.unwrap(), None);
    }
}
