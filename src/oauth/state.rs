//! Self-contained OAuth state token.
//!
//! The state parameter round-trips through the user's browser, so it carries
//! everything the callback needs (pending account identity plus the PKCE
//! verifier) inside an authenticated, encrypted envelope: CBOR claims sealed
//! with AES-128-GCM under a process-fixed key, with the random nonce
//! prepended and the whole blob URL-safe base64 encoded. Any tampered byte
//! fails decryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::ids::{AccountId, ServerId, UserId};
use crate::ports::RandomSource;

pub const STATE_KEY_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const MAX_DESCRIPTION_LEN: usize = 100;

/// Claims sealed into the token. Short field names keep the URL compact.
#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    acc: Uuid,
    name: String,
    desc: String,
    uid: Uuid,
    srv: Uuid,
    ch: Vec<u8>,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    account: AccountId,
    name: String,
    description: String,
    challenge: Vec<u8>,
    expire_at: DateTime<Utc>,
}

impl State {
    pub fn new(
        account: AccountId,
        name: impl Into<String>,
        description: impl Into<String>,
        challenge: Vec<u8>,
        expire_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let description = description.into();
        if name.is_empty() {
            return Err(CoreError::validation("name is required"));
        }
        if description.is_empty() {
            return Err(CoreError::validation("description is required"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::validation(format!(
                "description must be {MAX_DESCRIPTION_LEN} characters or less"
            )));
        }

        Ok(Self {
            account,
            name,
            description,
            challenge,
            expire_at,
        })
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn challenge(&self) -> &[u8] {
        &self.challenge
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    /// Seal the state into a URL-safe token.
    pub fn to_token(
        &self,
        random: &dyn RandomSource,
        key: &[u8; STATE_KEY_LEN],
    ) -> Result<String, CoreError> {
        let claims = StateClaims {
            acc: self.account.uuid(),
            name: self.name.clone(),
            desc: self.description.clone(),
            uid: self.account.user().uuid(),
            srv: self.account.server().uuid(),
            ch: self.challenge.clone(),
            exp: self.expire_at.timestamp(),
        };

        let mut plaintext = Vec::new();
        ciborium::into_writer(&claims, &mut plaintext)
            .map_err(|err| CoreError::internal(format!("encoding state claims: {err}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        random.fill(&mut nonce);

        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|err| CoreError::internal(format!("encrypting state: {err}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Open and validate a token: authenticity (AEAD), schema, and expiry
    /// against the supplied clock reading.
    pub fn from_token(
        token: &str,
        key: &[u8; STATE_KEY_LEN],
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let blob = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| CoreError::AuthFailed(format!("invalid state token base64: {err}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(CoreError::AuthFailed("state token is too short".into()));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::AuthFailed("decrypting state token".into()))?;

        let claims: StateClaims = ciborium::from_reader(plaintext.as_slice())
            .map_err(|err| CoreError::AuthFailed(format!("decoding state claims: {err}")))?;

        let expire_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| CoreError::AuthFailed("invalid state expiration".into()))?;
        if expire_at <= now {
            return Err(CoreError::AuthFailed("state token expired".into()));
        }

        let user = UserId::new(claims.uid)?;
        let server = ServerId::new(claims.srv)?;
        let account = AccountId::new(user, server, claims.acc)?;

        Self::new(account, claims.name, claims.desc, claims.ch, expire_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::OsRandom;
    use chrono::Duration;

    const KEY: [u8; STATE_KEY_LEN] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

    fn sample_state(expire_at: DateTime<Utc>) -> State {
        let account = AccountId::random(UserId::random(), ServerId::random());
        State::new(
            account,
            "test_account",
            "some description just to be sure that it's not too huge for token",
            vec![16, 32, 64, 128],
            expire_at,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn token_round_trip_preserves_state() {
        let state = sample_state(now() + Duration::minutes(5));
        let token = state.to_token(&OsRandom, &KEY).unwrap();

        let reversed = State::from_token(&token, &KEY, now()).unwrap();
        assert_eq!(reversed.account(), state.account());
        assert_eq!(reversed.name(), state.name());
        assert_eq!(reversed.description(), state.description());
        assert_eq!(reversed.challenge(), state.challenge());
        assert_eq!(reversed.expire_at(), state.expire_at());
    }

    #[test]
    fn single_byte_tamper_fails_decryption() {
        let state = sample_state(now() + Duration::minutes(5));
        let token = state.to_token(&OsRandom, &KEY).unwrap();

        let mut blob = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let middle = blob.len() / 2;
        blob[middle] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(blob);

        let err = State::from_token(&tampered, &KEY, now()).unwrap_err();
        assert!(matches!(err, CoreError::AuthFailed(_)));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let state = sample_state(now() + Duration::minutes(5));
        let token = state.to_token(&OsRandom, &KEY).unwrap();

        let mut other_key = KEY;
        other_key[0] ^= 0xff;
        assert!(State::from_token(&token, &other_key, now()).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let state = sample_state(now() + Duration::minutes(5));
        let token = state.to_token(&OsRandom, &KEY).unwrap();

        let err = State::from_token(&token, &KEY, now() + Duration::minutes(6)).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(State::from_token("not base64 at all!", &KEY, now()).is_err());
        assert!(State::from_token("dG9vc2hvcnQ", &KEY, now()).is_err());
    }

    #[test]
    fn description_length_is_bounded() {
        let account = AccountId::random(UserId::random(), ServerId::random());
        let too_long = "d".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(State::new(account, "name", too_long, vec![], now()).is_err());
        assert!(State::new(account, "", "desc", vec![], now()).is_err());
        assert!(State::new(account, "name", "", vec![], now()).is_err());
    }
}
