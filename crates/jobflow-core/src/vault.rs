//! Credentials vault: encrypted at-rest storage for per-user secrets the
//! handlers need (OAuth credential sets, auxiliary Q&A-service logins).
//! Values are AES-256-GCM encrypted before hitting sled and never logged.
//! Key from env `JOBFLOW_VAULT_KEY` (64 hex chars = 32 bytes). If the key is
//! not set, reads return nothing and writes are rejected.

use crate::error::{CoreError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const TREE: &str = "credential_vault";
const ENV_VAULT_KEY: &str = "JOBFLOW_VAULT_KEY";
const NONCE_LEN: usize = 12;

/// OAuth credential set reconstructed by the resume-tailoring handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthCredentials {
    pub token: String,
    pub refresh_token: String,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

/// Login for the external Q&A service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLogin {
    pub email: String,
    pub password: String,
}

/// Encrypted per-user credential store.
pub struct CredentialVault {
    store: Arc<crate::store::KvStore>,
    cipher: Option<Aes256Gcm>,
}

fn key_from_env() -> Option<Aes256Gcm> {
    let hex = std::env::var(ENV_VAULT_KEY).ok()?;
    let hex = hex.trim().replace([' ', '\n'], "");
    if hex.len() != 64 {
        return None;
    }
    let bytes = (0..32)
        .map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Aes256Gcm::new_from_slice(&bytes).ok()
}

impl CredentialVault {
    /// Vault with the key from `JOBFLOW_VAULT_KEY` (or no cipher if unset).
    pub fn from_env(store: Arc<crate::store::KvStore>) -> Self {
        Self {
            store,
            cipher: key_from_env(),
        }
    }

    /// Vault with an explicit 32-byte key. For tests.
    pub fn with_key(store: Arc<crate::store::KvStore>, key: &[u8; 32]) -> Self {
        Self {
            store,
            cipher: Aes256Gcm::new_from_slice(key).ok(),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.cipher.is_some()
    }

    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CoreError::Vault("vault key not configured".into()))?;
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plain)
            .map_err(|e| CoreError::Vault(format!("encrypt: {}", e)))?;
        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CoreError::Vault("vault key not configured".into()))?;
        if sealed.len() < NONCE_LEN {
            return Err(CoreError::Vault("corrupt blob".into()));
        }
        let (nonce_slice, ct) = sealed.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(nonce_slice);
        cipher
            .decrypt(nonce, ct)
            .map_err(|e| CoreError::Vault(format!("decrypt: {}", e)))
    }

    fn put<T: Serialize>(&self, kind: &str, user_id: Uuid, value: &T) -> Result<()> {
        let plain = serde_json::to_vec(value)?;
        let sealed = self.seal(&plain)?;
        self.store
            .put_json(TREE, &format!("{}/{}", kind, user_id), &sealed, None)
    }

    fn get<T: serde::de::DeserializeOwned>(&self, kind: &str, user_id: Uuid) -> Result<Option<T>> {
        if self.cipher.is_none() {
            return Ok(None);
        }
        let Some(sealed) = self.store.get_json::<Vec<u8>>(TREE, &format!("{}/{}", kind, user_id))? else {
            return Ok(None);
        };
        let plain = self.open(&sealed)?;
        Ok(Some(serde_json::from_slice(&plain)?))
    }

    pub fn put_oauth(&self, user_id: Uuid, credentials: &OauthCredentials) -> Result<()> {
        self.put("oauth", user_id, credentials)
    }

    pub fn get_oauth(&self, user_id: Uuid) -> Result<Option<OauthCredentials>> {
        self.get("oauth", user_id)
    }

    pub fn put_service_login(&self, user_id: Uuid, login: &ServiceLogin) -> Result<()> {
        self.put("service_login", user_id, login)
    }

    pub fn get_service_login(&self, user_id: Uuid) -> Result<Option<ServiceLogin>> {
        self.get("service_login", user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStore;

    #[test]
    fn round_trip_encrypts_at_rest() {
        let store = Arc::new(KvStore::open_temporary().unwrap());
        let vault = CredentialVault::with_key(Arc::clone(&store), &[7u8; 32]);
        let user = Uuid::new_v4();
        vault
            .put_service_login(
                user,
                &ServiceLogin {
                    email: "a@example.com".into(),
                    password: "hunter2".into(),
                },
            )
            .unwrap();

        let read = vault.get_service_login(user).unwrap().unwrap();
        assert_eq!(read.email, "a@example.com");

        // The raw stored bytes must not contain the plaintext password.
        let raw = store
            .get_json::<Vec<u8>>("credential_vault", &format!("service_login/{}", user))
            .unwrap()
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("hunter2"));
    }

    #[test]
    fn locked_vault_degrades_safely() {
        let store = Arc::new(KvStore::open_temporary().unwrap());
        let vault = CredentialVault {
            store,
            cipher: None,
        };
        assert!(!vault.is_unlocked());
        assert!(vault.get_service_login(Uuid::new_v4()).unwrap().is_none());
        assert!(vault
            .put_service_login(
                Uuid::new_v4(),
                &ServiceLogin {
                    email: String::new(),
                    password: String::new()
                }
            )
            .is_err());
    }
}
