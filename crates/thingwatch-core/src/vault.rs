// ── Encrypted credential vault ──
//
// Two on-disk generations share one envelope format:
//
//   v2 (current)  random 256-bit key in `credentials.key`, payload is a
//                 full `CredentialRecord`, stored in `credentials.enc`.
//   v1 (legacy)   key derived from client id + secret with PBKDF2, payload
//                 is a bare `TokenBundle`, stored in `tokens.enc`.
//
// Ciphertext is base64(nonce || ciphertext || tag), AES-256-GCM with a
// 128-bit random nonce. Any decode or authentication failure is "absent".

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::{debug, info, warn};

use crate::config::OAuthClientCredentials;
use crate::error::CoreError;
use crate::model::{CredentialRecord, TokenBundle};

type Cipher = AesGcm<Aes256, U16>;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

pub const ENVELOPE_VERSION_CURRENT: u32 = 2;
pub const ENVELOPE_VERSION_LEGACY: u32 = 1;

pub const KEY_FILE: &str = "credentials.key";
pub const CREDENTIALS_FILE: &str = "credentials.enc";
pub const LEGACY_TOKENS_FILE: &str = "tokens.enc";

const LEGACY_KDF_ROUNDS: u32 = 100_000;
const LEGACY_KDF_SALT: &[u8] = b"thingwatch.token-vault.v1";

// ── Key material ─────────────────────────────────────────────────────

/// 256-bit AES key. Debug output never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded.trim()).ok()?;
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Fresh random key from the OS RNG.
pub fn generate_key() -> VaultKey {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    VaultKey(bytes)
}

/// Key for the legacy generation, derived from the OAuth client credentials.
pub fn derive_legacy_key(client_id: &str, client_secret: &SecretString) -> VaultKey {
    let password = format!("{client_id}:{}", client_secret.expose_secret());
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        LEGACY_KDF_SALT,
        LEGACY_KDF_ROUNDS,
        &mut bytes,
    );
    VaultKey(bytes)
}

// ── AEAD primitives ──────────────────────────────────────────────────

pub fn encrypt(plain: &[u8], key: &VaultKey) -> Result<String, CoreError> {
    let cipher = Cipher::new(GenericArray::from_slice(&key.0));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(GenericArray::from_slice(&nonce), plain)
        .map_err(|_| CoreError::Vault {
            message: "encryption failed".into(),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(STANDARD.encode(out))
}

/// `None` on malformed input, wrong key, or a failed tag check.
pub fn decrypt(ciphertext: &str, key: &VaultKey) -> Option<Vec<u8>> {
    let raw = STANDARD.decode(ciphertext.trim()).ok()?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let cipher = Cipher::new(GenericArray::from_slice(&key.0));
    cipher.decrypt(GenericArray::from_slice(nonce), sealed).ok()
}

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u32,
    pub ciphertext: String,
    pub updated_at: DateTime<Utc>,
}

/// What the loader found on disk.
#[derive(Debug)]
pub enum StoredCredentials {
    Current(CredentialRecord),
    /// Legacy bundle, already promoted using the configured client credentials.
    Legacy(CredentialRecord),
}

impl StoredCredentials {
    pub fn into_record(self) -> CredentialRecord {
        match self {
            Self::Current(r) | Self::Legacy(r) => r,
        }
    }
}

// ── Vault ────────────────────────────────────────────────────────────

/// File-backed credential store rooted at a session's data directory.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    dir: PathBuf,
}

impl CredentialVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    fn legacy_path(&self) -> PathBuf {
        self.dir.join(LEGACY_TOKENS_FILE)
    }

    /// Read the key file, creating it when neither key nor ciphertext exist.
    ///
    /// An unreadable key, or ciphertext without its key, is fatal: silently
    /// generating a new key would orphan the stored credentials.
    pub fn load_or_create_key(&self) -> Result<VaultKey, CoreError> {
        let key_path = self.key_path();
        match std::fs::read_to_string(&key_path) {
            Ok(contents) => VaultKey::from_base64(&contents).ok_or_else(|| CoreError::Vault {
                message: format!("key file {} is malformed", key_path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.credentials_path().exists() {
                    return Err(CoreError::Vault {
                        message: format!(
                            "{} exists but its key file {} is missing",
                            self.credentials_path().display(),
                            key_path.display()
                        ),
                    });
                }
                let key = generate_key();
                std::fs::create_dir_all(&self.dir)?;
                write_private(&key_path, key.to_base64().as_bytes())?;
                info!(path = %key_path.display(), "generated credential vault key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load credentials, current generation first, then legacy.
    ///
    /// `legacy_client` supplies the client id/secret the legacy key is
    /// derived from; without it the legacy file is ignored.
    pub fn load(
        &self,
        legacy_client: Option<&OAuthClientCredentials>,
    ) -> Result<Option<StoredCredentials>, CoreError> {
        if self.credentials_path().exists() {
            let key = self.load_or_create_key()?;
            if let Some(record) = read_envelope(&self.credentials_path())
                .and_then(|env| open_envelope::<CredentialRecord>(&env, ENVELOPE_VERSION_CURRENT, &key))
            {
                return Ok(Some(StoredCredentials::Current(record)));
            }
            warn!(path = %self.credentials_path().display(), "stored credentials unreadable");
        }

        let Some(client) = legacy_client else {
            return Ok(None);
        };
        if !self.legacy_path().exists() {
            return Ok(None);
        }

        let key = derive_legacy_key(&client.client_id, &client.client_secret);
        let bundle = read_envelope(&self.legacy_path())
            .and_then(|env| open_envelope::<TokenBundle>(&env, ENVELOPE_VERSION_LEGACY, &key));
        match bundle {
            Some(bundle) => {
                debug!("loaded legacy token bundle");
                Ok(Some(StoredCredentials::Legacy(CredentialRecord::from_bundle(
                    client.client_id.clone(),
                    client.client_secret.clone(),
                    bundle,
                ))))
            }
            None => {
                warn!(path = %self.legacy_path().display(), "legacy tokens unreadable");
                Ok(None)
            }
        }
    }

    /// Persist as the current generation. Removes any legacy file afterwards.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let key = self.load_or_create_key()?;
        let plain = serde_json::to_vec(record).map_err(|e| CoreError::Vault {
            message: format!("serialize credentials: {e}"),
        })?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION_CURRENT,
            ciphertext: encrypt(&plain, &key)?,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| CoreError::Vault {
            message: format!("serialize envelope: {e}"),
        })?;
        write_private(&self.credentials_path(), &json)?;

        let legacy = self.legacy_path();
        if legacy.exists() {
            std::fs::remove_file(&legacy)?;
            info!("migrated legacy token bundle to current vault format");
        }
        Ok(())
    }
}

fn read_envelope(path: &Path) -> Option<Envelope> {
    let raw = std::fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

fn open_envelope<T: for<'de> Deserialize<'de>>(
    envelope: &Envelope,
    expected_version: u32,
    key: &VaultKey,
) -> Option<T> {
    if envelope.version != expected_version {
        debug!(
            version = envelope.version,
            expected = expected_version,
            "envelope version mismatch"
        );
        return None;
    }
    let plain = decrypt(&envelope.ciphertext, key)?;
    serde_json::from_slice(&plain).ok()
}

/// Write a file readable by the owner only.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Write a legacy-generation envelope. Only used to stage migrations in tests.
#[cfg(test)]
pub(crate) fn write_legacy(
    dir: &Path,
    bundle: &TokenBundle,
    client: &OAuthClientCredentials,
) -> Result<(), CoreError> {
    let key = derive_legacy_key(&client.client_id, &client.client_secret);
    let plain = serde_json::to_vec(bundle).map_err(|e| CoreError::Internal(e.to_string()))?;
    let envelope = Envelope {
        version: ENVELOPE_VERSION_LEGACY,
        ciphertext: encrypt(&plain, &key)?,
        updated_at: Utc::now(),
    };
    let json = serde_json::to_vec(&envelope).map_err(|e| CoreError::Internal(e.to_string()))?;
    std::fs::create_dir_all(dir)?;
    write_private(&dir.join(LEGACY_TOKENS_FILE), &json)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn record() -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            client_id: "client".into(),
            client_secret: SecretString::from("shh".to_owned()),
            access_token: SecretString::from("access".to_owned()),
            refresh_token: SecretString::from("refresh".to_owned()),
            token_type: "bearer".into(),
            scope: Some("r:devices:*".into()),
            expires_at: Some(now + TimeDelta::hours(24)),
            obtained_at: now,
        }
    }

    fn client() -> OAuthClientCredentials {
        OAuthClientCredentials {
            client_id: "client".into(),
            client_secret: SecretString::from("shh".to_owned()),
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = generate_key();
        let plain = serde_json::to_vec(&record()).unwrap();
        let sealed = encrypt(&plain, &key).unwrap();
        assert_eq!(decrypt(&sealed, &key), Some(plain));
    }

    #[test]
    fn wrong_key_and_garbage_decrypt_to_none() {
        let sealed = encrypt(b"payload", &generate_key()).unwrap();
        assert_eq!(decrypt(&sealed, &generate_key()), None);
        assert_eq!(decrypt("not base64 !!", &generate_key()), None);
        assert_eq!(decrypt("", &generate_key()), None);
        assert_eq!(decrypt(&STANDARD.encode([0u8; 8]), &generate_key()), None);
    }

    #[test]
    fn tampered_ciphertext_fails_tag_check() {
        let key = generate_key();
        let sealed = encrypt(b"payload", &key).unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert_eq!(decrypt(&STANDARD.encode(raw), &key), None);
    }

    #[test]
    fn nonces_differ_per_encryption() {
        let key = generate_key();
        assert_ne!(encrypt(b"x", &key).unwrap(), encrypt(b"x", &key).unwrap());
    }

    #[test]
    fn legacy_key_is_deterministic() {
        let a = derive_legacy_key("id", &SecretString::from("s".to_owned()));
        let b = derive_legacy_key("id", &SecretString::from("s".to_owned()));
        let c = derive_legacy_key("id", &SecretString::from("t".to_owned()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn save_then_load_current_generation() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        vault.save(&record()).unwrap();

        let loaded = vault.load(None).unwrap();
        let Some(StoredCredentials::Current(rec)) = loaded else {
            panic!("expected current generation, got {loaded:?}");
        };
        assert_eq!(rec.refresh_token.expose_secret(), "refresh");
        assert_eq!(rec.client_id, "client");
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        vault.save(&record()).unwrap();
        for name in [KEY_FILE, CREDENTIALS_FILE] {
            let mode = std::fs::metadata(dir.path().join(name))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{name}");
        }
    }

    #[test]
    fn empty_dir_loads_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CredentialVault::new(dir.path()).load(Some(&client())).unwrap().is_none());
    }

    #[test]
    fn missing_key_with_ciphertext_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        vault.save(&record()).unwrap();
        std::fs::remove_file(dir.path().join(KEY_FILE)).unwrap();

        assert!(matches!(vault.load(None), Err(CoreError::Vault { .. })));
        assert!(!dir.path().join(KEY_FILE).exists());
    }

    #[test]
    fn corrupt_key_file_is_fatal_and_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "garbage").unwrap();
        let vault = CredentialVault::new(dir.path());
        assert!(matches!(vault.load_or_create_key(), Err(CoreError::Vault { .. })));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(KEY_FILE)).unwrap(),
            "garbage"
        );
    }

    #[test]
    fn unknown_envelope_version_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        vault.save(&record()).unwrap();

        let path = dir.path().join(CREDENTIALS_FILE);
        let mut env: Envelope = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        env.version = 7;
        std::fs::write(&path, serde_json::to_vec(&env).unwrap()).unwrap();

        assert!(vault.load(None).unwrap().is_none());
    }

    #[test]
    fn legacy_bundle_loads_and_migrates_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = TokenBundle {
            access_token: SecretString::from("old-access".to_owned()),
            refresh_token: SecretString::from("old-refresh".to_owned()),
            token_type: None,
            scope: None,
            expires_at: None,
            obtained_at: None,
        };
        write_legacy(dir.path(), &bundle, &client()).unwrap();

        let vault = CredentialVault::new(dir.path());
        assert!(vault.load(None).unwrap().is_none(), "legacy needs client credentials");

        let loaded = vault.load(Some(&client())).unwrap();
        let Some(StoredCredentials::Legacy(rec)) = loaded else {
            panic!("expected legacy generation, got {loaded:?}");
        };
        assert_eq!(rec.refresh_token.expose_secret(), "old-refresh");

        vault.save(&rec).unwrap();
        assert!(!dir.path().join(LEGACY_TOKENS_FILE).exists());
        assert!(matches!(
            vault.load(Some(&client())).unwrap(),
            Some(StoredCredentials::Current(_))
        ));
    }
}
