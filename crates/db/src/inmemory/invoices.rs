//! In-memory invoice secret store.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use wallet_service_proto::{InvoiceSecretStore, KeyStorageError};
use wallet_signer::{Fulfillment, InvoiceSecret, PREIMAGE_LEN};

/// Invoice secrets and swap fulfillments held in process memory.
#[derive(Debug, Default, Clone)]
pub struct InvoiceSecretStoreInMemory {
    /// payment_hash -> secret
    secrets: Arc<RwLock<HashMap<[u8; PREIMAGE_LEN], InvoiceSecret>>>,

    /// swap uuid -> fulfillment
    fulfillments: Arc<RwLock<HashMap<String, Fulfillment>>>,
}

impl InvoiceSecretStoreInMemory {
    /// Number of secrets not yet consumed by a fulfillment.
    pub async fn unused_secrets(&self) -> usize {
        let fulfilled = self.fulfillments.read().await;
        self.secrets
            .read()
            .await
            .values()
            .filter(|secret| {
                !fulfilled
                    .values()
                    .any(|f| f.preimage() == secret.preimage())
            })
            .count()
    }
}

#[async_trait]
impl InvoiceSecretStore for InvoiceSecretStoreInMemory {
    async fn invoice_secret(
        &self,
        payment_hash: &[u8; PREIMAGE_LEN],
    ) -> Result<Option<InvoiceSecret>, KeyStorageError> {
        Ok(self.secrets.read().await.get(payment_hash).cloned())
    }

    async fn store_invoice_secrets(
        &self,
        secrets: &[InvoiceSecret],
    ) -> Result<(), KeyStorageError> {
        trace!(action = "trying to acquire wlock on invoice secrets", count = secrets.len());
        let mut map = self.secrets.write().await;
        trace!(event = "wlock acquired on invoice secrets");

        for secret in secrets {
            map.insert(*secret.payment_hash(), secret.clone());
        }

        debug!(count = secrets.len(), total = map.len(), "stored invoice secrets");
        Ok(())
    }

    async fn record_fulfillment(
        &self,
        uuid: &str,
        fulfillment: &Fulfillment,
    ) -> Result<(), KeyStorageError> {
        self.fulfillments
            .write()
            .await
            .insert(uuid.to_string(), fulfillment.clone());

        debug!(%uuid, on_chain = fulfillment.transaction().is_some(), "recorded fulfillment");
        Ok(())
    }

    async fn fulfillment(&self, uuid: &str) -> Result<Option<Fulfillment>, KeyStorageError> {
        Ok(self.fulfillments.read().await.get(uuid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secrets_are_found_by_payment_hash() {
        let store = InvoiceSecretStoreInMemory::default();
        let secrets = (0..3)
            .map(InvoiceSecret::generate)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        store.store_invoice_secrets(&secrets).await.unwrap();

        for secret in &secrets {
            let found = store
                .invoice_secret(secret.payment_hash())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.preimage(), secret.preimage());
            assert_eq!(found.key_path(), secret.key_path());
        }
        assert!(store.invoice_secret(&[0; 32]).await.unwrap().is_none());
        assert_eq!(store.unused_secrets().await, 3);
    }

    #[tokio::test]
    async fn fulfillments_are_recorded_per_swap() {
        let store = InvoiceSecretStoreInMemory::default();
        let secret = InvoiceSecret::generate(0).unwrap();
        store
            .store_invoice_secrets(std::slice::from_ref(&secret))
            .await
            .unwrap();

        let fulfillment = Fulfillment::new(*secret.preimage(), None);
        store.record_fulfillment("swap-1", &fulfillment).await.unwrap();

        assert_eq!(
            store.fulfillment("swap-1").await.unwrap(),
            Some(fulfillment)
        );
        assert!(store.fulfillment("swap-2").await.unwrap().is_none());
        assert_eq!(store.unused_secrets().await, 0);
    }
}
