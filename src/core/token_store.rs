//! Encrypted on-disk cache for the API bearer token.
//!
//! Two files live in the store directory: `secret.key` holds a base64 AES-256
//! key generated on first use, `token.enc` holds the base64 of
//! `nonce || ciphertext` of the token's JSON form.

use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::core::error::{BillingError, BillingResult};

const KEY_FILE: &str = "secret.key";
const TOKEN_FILE: &str = "token.enc";
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// A token is usable only while its expiry is strictly in the future.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

/// Default store directory, respecting XDG_CACHE_HOME.
pub fn default_store_dir() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".cache")
        })
        .join("azcost")
}

fn store_error(context: &str, err: impl std::fmt::Display) -> BillingError {
    BillingError::TokenStore(format!("{}: {}", context, err))
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}

fn sealing_key(key: &[u8; KEY_LEN]) -> BillingResult<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| BillingError::TokenStore("invalid key material".into()))?;
    Ok(LessSafeKey::new(unbound))
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> BillingResult<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| BillingError::TokenStore("failed to generate nonce".into()))?;

    let mut in_out = plaintext.to_vec();
    sealing_key(key)?
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
        .map_err(|_| BillingError::TokenStore("encryption failed".into()))?;

    let mut out = nonce_bytes.to_vec();
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return None;
    }
    let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
    let mut in_out = sealed.to_vec();
    let plain = sealing_key(key)
        .ok()?
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .ok()?;
    Some(plain.to_vec())
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn read_key(&self) -> Option<[u8; KEY_LEN]> {
        let encoded = std::fs::read_to_string(self.key_path()).ok()?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        bytes.try_into().ok()
    }

    fn load_or_create_key(&self) -> BillingResult<[u8; KEY_LEN]> {
        if let Some(key) = self.read_key() {
            return Ok(key);
        }

        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| BillingError::TokenStore("failed to generate key".into()))?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| store_error(&format!("create {}", self.dir.display()), e))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(key);
        write_private(&self.key_path(), encoded.as_bytes())
            .map_err(|e| store_error("write key", e))?;
        tracing::debug!(path = %self.key_path().display(), "Generated token encryption key");
        Ok(key)
    }

    /// Load the persisted token. A token that cannot be decrypted (missing or
    /// rotated key, corrupt file) is discarded and `None` is returned so the
    /// caller fetches a fresh one.
    pub fn load(&self) -> Option<Token> {
        let path = self.token_path();
        let encoded = std::fs::read_to_string(&path).ok()?;

        let token = self.read_key().and_then(|key| {
            let data = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .ok()?;
            let plain = decrypt(&key, &data)?;
            serde_json::from_slice::<Token>(&plain).ok()
        });

        if token.is_none() {
            tracing::warn!(path = %path.display(), "Discarding unreadable cached token");
            let _ = std::fs::remove_file(&path);
        }
        token
    }

    /// Encrypt and persist a token, generating the key if absent.
    pub fn save(&self, token: &Token) -> BillingResult<()> {
        let key = self.load_or_create_key()?;
        let json = serde_json::to_vec(token).map_err(|e| store_error("serialize token", e))?;
        let sealed = encrypt(&key, &json)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(sealed);
        write_private(&self.token_path(), encoded.as_bytes())
            .map_err(|e| store_error("write token", e))?;
        Ok(())
    }

    /// Delete both the token and its key. Returns whether anything existed.
    pub fn clear(&self) -> BillingResult<bool> {
        let mut removed = false;
        for path in [self.token_path(), self.key_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed");
                    removed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(store_error(&format!("remove {}", path.display()), e)),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(hours: i64) -> Token {
        Token {
            access_token: "eyJ0eXAi.test.token".into(),
            expires_at: Utc::now() + Duration::hours(hours),
        }
    }

    #[test]
    fn token_validity_is_strict() {
        let now = Utc::now();
        let t = Token {
            access_token: "x".into(),
            expires_at: now,
        };
        assert!(!t.is_valid_at(now));
        assert!(t.is_valid_at(now - Duration::seconds(1)));
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(store.load().is_none());
    }

    #[test]
    fn save_writes_key_and_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested"));
        let t = token(1);
        store.save(&t).unwrap();

        assert!(store.key_path().exists());
        let on_disk = std::fs::read_to_string(store.token_path()).unwrap();
        assert!(!on_disk.contains("eyJ0eXAi"));
        assert_eq!(store.load(), Some(t));
    }

    #[test]
    fn key_is_reused_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&token(1)).unwrap();
        let first = std::fs::read_to_string(store.key_path()).unwrap();
        store.save(&token(2)).unwrap();
        let second = std::fs::read_to_string(store.key_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rotated_key_discards_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&token(1)).unwrap();

        let other_key = base64::engine::general_purpose::STANDARD.encode([7u8; KEY_LEN]);
        std::fs::write(store.key_path(), other_key).unwrap();

        assert!(store.load().is_none());
        assert!(!store.token_path().exists());
    }

    #[test]
    fn missing_key_discards_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&token(1)).unwrap();
        std::fs::remove_file(store.key_path()).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_token_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&token(1)).unwrap();
        std::fs::write(store.token_path(), "not base64 !!").unwrap();
        assert!(store.load().is_none());
        assert!(!store.token_path().exists());
    }

    #[test]
    fn corrupt_key_is_regenerated_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        std::fs::write(store.key_path(), "short").unwrap();
        let t = token(1);
        store.save(&t).unwrap();
        assert_eq!(store.load(), Some(t));
    }

    #[test]
    fn clear_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(!store.clear().unwrap());
        store.save(&token(1)).unwrap();
        assert!(store.clear().unwrap());
        assert!(!store.key_path().exists());
        assert!(!store.token_path().exists());
    }

    #[test]
    fn default_store_dir_uses_xdg_cache() {
        std::env::set_var("XDG_CACHE_HOME", "/tmp/test_xdg_cache");
        let dir = default_store_dir();
        std::env::remove_var("XDG_CACHE_HOME");
        assert_eq!(dir, PathBuf::from("/tmp/test_xdg_cache/azcost"));
    }
}
