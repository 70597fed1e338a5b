//! Registration of password and recovery code challenges.

use std::{fmt, sync::Arc};

use tokio::sync::watch;
use tracing::{error, info};
use wallet_crypto::{
    ChallengeKey, ChallengePrivateKey, ChallengeType, CryptoProvider, KeyCrypter,
    NativeCryptoProvider, RecoveryCode, CHALLENGE_SALT_LEN,
};
use wallet_service_proto::{ChallengeSetup, KeyCoordinationService, KeyStorage};

use crate::{ActionState, ChallengeSetupError, SingleFlight};

/// Sets up a challenge so the user can later prove knowledge of a password or recovery code.
///
/// The base key is encrypted with the same secret and handed to the service, which is what lets a
/// user restore the wallet with the secret alone. Setting up a type that already has a key
/// rotates it.
pub struct ChallengeSetupAction {
    storage: Arc<dyn KeyStorage>,
    service: Arc<dyn KeyCoordinationService>,
    crypter: KeyCrypter,
    flight: SingleFlight<ChallengeKey, ChallengeSetupError>,
}

impl fmt::Debug for ChallengeSetupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeSetupAction")
            .field("flight", &self.flight)
            .finish_non_exhaustive()
    }
}

impl ChallengeSetupAction {
    /// Creates the action.
    pub fn new(storage: Arc<dyn KeyStorage>, service: Arc<dyn KeyCoordinationService>) -> Self {
        Self::with_crypter(storage, service, KeyCrypter::new())
    }

    /// Creates the action with a specific base key crypter.
    pub fn with_crypter(
        storage: Arc<dyn KeyStorage>,
        service: Arc<dyn KeyCoordinationService>,
        crypter: KeyCrypter,
    ) -> Self {
        Self {
            storage,
            service,
            crypter,
            flight: SingleFlight::new(),
        }
    }

    /// Observes the progress of setups.
    pub fn state(&self) -> watch::Receiver<ActionState<ChallengeKey, ChallengeSetupError>> {
        self.flight.subscribe()
    }

    /// Sets up a `challenge_type` challenge for `user_input`, or joins the setup in progress.
    pub async fn run(
        &self,
        challenge_type: ChallengeType,
        user_input: &str,
    ) -> Result<ChallengeKey, ChallengeSetupError> {
        let storage = self.storage.clone();
        let service = self.service.clone();
        let crypter = self.crypter.clone();
        let user_input = user_input.to_string();

        self.flight
            .run(move || async move {
                let result = setup(&*storage, &*service, &crypter, challenge_type, user_input).await;
                if let Err(e) = &result {
                    if e.is_fatal() {
                        error!(?challenge_type, error = %e, "challenge setup hit a fatal error");
                    }
                }
                result
            })
            .await
    }
}

async fn setup(
    storage: &dyn KeyStorage,
    service: &dyn KeyCoordinationService,
    crypter: &KeyCrypter,
    challenge_type: ChallengeType,
    user_input: String,
) -> Result<ChallengeKey, ChallengeSetupError> {
    let salt: [u8; CHALLENGE_SALT_LEN] = NativeCryptoProvider.random_array()?;

    let (challenge, passphrase) = match challenge_type {
        ChallengeType::Password => (
            ChallengePrivateKey::from_password(&user_input, &salt)?,
            user_input,
        ),
        ChallengeType::RecoveryCode => {
            let code = RecoveryCode::parse(&user_input)?;
            let code_salt = ChallengeType::RecoveryCode
                .requires_salt(code.version())
                .then_some(&salt[..]);
            (
                ChallengePrivateKey::from_recovery_code(&code, code_salt)?,
                code.to_string(),
            )
        }
        ChallengeType::UserKey => return Err(ChallengeSetupError::Unsupported(challenge_type)),
    };
    let key = challenge.challenge_key();

    let encrypted_private_key = {
        let base_key = storage.base_private_key().await?;
        crypter.encrypt(&base_key, &passphrase)?
    };
    drop(passphrase);

    // saltless challenges still send one
    let setup = ChallengeSetup {
        challenge_type,
        public_key: *key.public_key(),
        salt: key.salt().unwrap_or(&salt).to_vec(),
        encrypted_private_key,
        version: key.version(),
    };
    let response = service.setup_challenge(&setup).await?;

    let rotated = storage.has_challenge_key(challenge_type).await?;
    storage.store_challenge_key(&key).await?;
    if let Some(muun_key) = &response.muun_key {
        storage.store_muun_private_key(muun_key).await?;
    }
    if let Some(fingerprint) = &response.muun_key_fingerprint {
        storage.store_muun_key_fingerprint(fingerprint).await?;
    }

    info!(
        ?challenge_type,
        version = key.version(),
        checksum = %key.checksum(),
        rotated,
        "set up challenge"
    );
    Ok(key)
}

#[cfg(test)]
mod tests {
    use wallet_crypto::ScryptCost;
    use wallet_db::inmemory::prelude::KeyStorageInMemory;
    use wallet_service_proto::{PublicKeySet, ServiceError, SetupChallengeResponse};
    use wallet_test_utils::{fixtures, FakeCoordinationService};

    use super::*;

    const PASSWORD: &str = "correct horse battery staple";
    const FAST_SCRYPT: ScryptCost = ScryptCost {
        log_n: 4,
        r: 8,
        p: 1,
    };

    struct Setup {
        storage: Arc<KeyStorageInMemory>,
        service: Arc<FakeCoordinationService>,
        action: ChallengeSetupAction,
    }

    async fn setup() -> Setup {
        let storage = Arc::new(KeyStorageInMemory::new(fixtures::NETWORK));
        storage
            .store_base_private_key(&fixtures::user_base_key())
            .await
            .unwrap();
        let service = Arc::new(FakeCoordinationService::new(PublicKeySet::new(
            fixtures::user_base_key().public_key(),
        )));
        let action = ChallengeSetupAction::with_crypter(
            storage.clone(),
            service.clone(),
            KeyCrypter::with_cost(NativeCryptoProvider, FAST_SCRYPT),
        );

        Setup {
            storage,
            service,
            action,
        }
    }

    #[tokio::test]
    async fn password_setup_registers_and_stores_the_key() {
        let s = setup().await;
        s.service.respond_to_challenges(SetupChallengeResponse {
            muun_key: Some("encrypted muun key".to_string()),
            muun_key_fingerprint: Some("0a0b0c0d".to_string()),
        });

        let key = s.action.run(ChallengeType::Password, PASSWORD).await.unwrap();

        let sent = s.service.challenge_setups().pop().unwrap();
        assert_eq!(sent.challenge_type, ChallengeType::Password);
        assert_eq!(sent.public_key, *key.public_key());
        assert_eq!(Some(&sent.salt[..]), key.salt());
        assert_eq!(sent.salt.len(), CHALLENGE_SALT_LEN);

        let restored = KeyCrypter::new()
            .decrypt(&sent.encrypted_private_key, PASSWORD, fixtures::NETWORK)
            .unwrap();
        assert_eq!(restored.to_base58(), fixtures::user_base_key().to_base58());

        assert_eq!(
            s.storage.challenge_key(ChallengeType::Password).await.unwrap(),
            key
        );
        assert!(key.derive_private(PASSWORD).is_ok());
        assert_eq!(
            s.storage.muun_private_key().await.unwrap(),
            "encrypted muun key"
        );
        assert_eq!(s.storage.muun_key_fingerprint().await.unwrap(), "0a0b0c0d");
    }

    #[tokio::test]
    async fn current_recovery_codes_are_saltless() {
        let s = setup().await;
        let code = RecoveryCode::random().unwrap();

        let key = s
            .action
            .run(ChallengeType::RecoveryCode, &code.to_string().to_lowercase())
            .await
            .unwrap();

        assert_eq!(key.salt(), None);
        assert_eq!(key.version(), code.version());
        let sent = s.service.challenge_setups().pop().unwrap();
        assert_eq!(sent.salt.len(), CHALLENGE_SALT_LEN);
        assert!(s.storage.muun_private_key().await.unwrap_err().is_missing());
    }

    #[tokio::test]
    async fn second_setup_rotates_the_key() {
        let s = setup().await;

        let first = s.action.run(ChallengeType::Password, PASSWORD).await.unwrap();
        let second = s.action.run(ChallengeType::Password, "another one").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(
            s.storage.challenge_key(ChallengeType::Password).await.unwrap(),
            second
        );
        assert_eq!(s.service.challenge_setups().len(), 2);
    }

    #[tokio::test]
    async fn new_recovery_code_opens_the_next_kit() {
        let s = setup().await;
        s.service.respond_to_challenges(SetupChallengeResponse {
            muun_key: Some("encrypted muun key".to_string()),
            muun_key_fingerprint: Some("0a0b0c0d".to_string()),
        });
        let kits = crate::EmergencyKitDataSelector::new(s.storage.clone());

        let old_code = RecoveryCode::random().unwrap();
        s.action
            .run(ChallengeType::RecoveryCode, &old_code.to_string())
            .await
            .unwrap();
        let old_kit = kits.get().await.unwrap();

        let new_code = RecoveryCode::random().unwrap();
        let new_key = s
            .action
            .run(ChallengeType::RecoveryCode, &new_code.to_string())
            .await
            .unwrap();
        let new_kit = kits.get().await.unwrap();

        assert_ne!(new_kit.user_key, old_kit.user_key);
        assert_eq!(new_kit.rc_checksum, new_key.checksum());
        let opened = new_key
            .derive_private(&new_code.to_string())
            .unwrap()
            .decrypt_key(&new_kit.user_key, fixtures::NETWORK)
            .unwrap();
        assert_eq!(
            opened.user_key.to_base58(),
            fixtures::user_base_key().to_base58()
        );
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_service() {
        let s = setup().await;

        let bad_code = s.action.run(ChallengeType::RecoveryCode, "not a code").await;
        let user_key = s.action.run(ChallengeType::UserKey, PASSWORD).await;

        assert!(matches!(bad_code, Err(ChallengeSetupError::RecoveryCode(_))));
        assert!(matches!(user_key, Err(ChallengeSetupError::Unsupported(ChallengeType::UserKey))));
        assert!(s.service.challenge_setups().is_empty());
    }

    #[tokio::test]
    async fn service_failure_stores_nothing() {
        let s = setup().await;
        s.service.fail_next_challenge(ServiceError::Timeout);

        let result = s.action.run(ChallengeType::Password, PASSWORD).await;

        assert!(matches!(result, Err(ChallengeSetupError::Service(ServiceError::Timeout))));
        assert!(!s.storage.has_challenge_key(ChallengeType::Password).await.unwrap());
        assert!(matches!(s.action.state().borrow().clone(), ActionState::Error(_)));
    }
}
