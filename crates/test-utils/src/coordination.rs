//! A scripted key coordination service.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::watch;
use wallet_key_deriv::WalletPublicKey;
use wallet_service_proto::{
    ChallengeSetup, KeyCoordinationService, PublicKeySet, ServiceError, SetupChallengeResponse,
};

/// Answers key set updates with a fixed [`PublicKeySet`] and records challenge setups.
#[derive(Debug)]
pub struct FakeCoordinationService {
    key_set: PublicKeySet,
    update_failures: Mutex<VecDeque<ServiceError>>,
    update_calls: watch::Sender<usize>,
    challenge_setups: Mutex<Vec<ChallengeSetup>>,
    challenge_response: Mutex<SetupChallengeResponse>,
    challenge_failure: Mutex<Option<ServiceError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeCoordinationService {
    /// A service that answers every update with `key_set`.
    pub fn new(key_set: PublicKeySet) -> Self {
        Self {
            key_set,
            update_failures: Mutex::new(VecDeque::new()),
            update_calls: watch::Sender::new(0),
            challenge_setups: Mutex::new(Vec::new()),
            challenge_response: Mutex::new(SetupChallengeResponse::default()),
            challenge_failure: Mutex::new(None),
        }
    }

    /// Makes the next `count` updates fail with `error`.
    pub fn fail_next_updates(&self, count: usize, error: ServiceError) {
        lock(&self.update_failures).extend(std::iter::repeat(error).take(count));
    }

    /// Number of key set updates received, failed ones included.
    pub fn update_calls(&self) -> usize {
        *self.update_calls.borrow()
    }

    /// Waits until at least `count` updates were received.
    pub async fn wait_for_update_calls(&self, count: usize) {
        let mut calls = self.update_calls.subscribe();
        calls
            .wait_for(|calls| *calls >= count)
            .await
            .expect("sender lives as long as the service");
    }

    /// Answers later challenge setups with `response`.
    pub fn respond_to_challenges(&self, response: SetupChallengeResponse) {
        *lock(&self.challenge_response) = response;
    }

    /// Makes the next challenge setup fail with `error`.
    pub fn fail_next_challenge(&self, error: ServiceError) {
        *lock(&self.challenge_failure) = Some(error);
    }

    /// Challenge setups received, in order. Failed ones are not recorded.
    pub fn challenge_setups(&self) -> Vec<ChallengeSetup> {
        lock(&self.challenge_setups).clone()
    }
}

#[async_trait]
impl KeyCoordinationService for FakeCoordinationService {
    async fn update_public_key_set(
        &self,
        _base_public_key: &WalletPublicKey,
    ) -> Result<PublicKeySet, ServiceError> {
        let failure = lock(&self.update_failures).pop_front();
        self.update_calls.send_modify(|calls| *calls += 1);

        match failure {
            Some(error) => Err(error),
            None => Ok(self.key_set.clone()),
        }
    }

    async fn fetch_muun_key_fingerprint(&self) -> Result<String, ServiceError> {
        self.key_set
            .base_cosigning_public_key
            .as_ref()
            .map(|key| key.fingerprint().to_string())
            .ok_or_else(|| ServiceError::Default("wallet has no cosigning key".to_string()))
    }

    async fn setup_challenge(
        &self,
        setup: &ChallengeSetup,
    ) -> Result<SetupChallengeResponse, ServiceError> {
        if let Some(error) = lock(&self.challenge_failure).take() {
            return Err(error);
        }

        lock(&self.challenge_setups).push(setup.clone());
        Ok(lock(&self.challenge_response).clone())
    }
}
