use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::ConfigError;

const PBKDF2_ROUNDS: u32 = 100_000;

/// How a chain's member passphrase is supplied in config.
///
/// Either stored in the clear, or encrypted at rest and decrypted with a
/// password supplied out of band (see `resolve`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum PassphraseConfig {
    /// Stored in the clear in the config file.
    Passphrase { passphrase: String },
    /// AES-256-GCM ciphertext, base64-encoded salt/nonce/ciphertext.
    /// Decrypted with a password supplied out-of-band, the same way the
    /// teacher keeps the signing key out of the config file.
    EncryptedPassphrase {
        encrypted_passphrase: EncryptedBlob,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub salt_b64: String,
    pub nonce_b64: String,
    pub ciphertext_b64: String,
}

impl PassphraseConfig {
    /// Resolve to the clear passphrase, decrypting if necessary.
    ///
    /// `password` comes from `DEX_COORDINATOR_KEY_PASSWORD`, falling back
    /// to reading `DEX_COORDINATOR_KEY_PASSWORD_FILE` if unset.
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match self {
            PassphraseConfig::Passphrase { passphrase } => Ok(passphrase.clone()),
            PassphraseConfig::EncryptedPassphrase { encrypted_passphrase } => {
                let password = resolve_password_env()?;
                decrypt(encrypted_passphrase, &password)
            }
        }
    }
}

fn resolve_password_env() -> Result<String, ConfigError> {
    if let Ok(p) = std::env::var("DEX_COORDINATOR_KEY_PASSWORD") {
        return Ok(p);
    }
    if let Ok(path) = std::env::var("DEX_COORDINATOR_KEY_PASSWORD_FILE") {
        return std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::MissingDecryptionPassword(format!("{path}: {e}")));
    }
    Err(ConfigError::MissingDecryptionPassword(
        "set DEX_COORDINATOR_KEY_PASSWORD or DEX_COORDINATOR_KEY_PASSWORD_FILE".into(),
    ))
}

fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<String, ConfigError> {
    let salt = b64_decode(&blob.salt_b64)?;
    let nonce_bytes = b64_decode(&blob.nonce_b64)?;
    let ciphertext = b64_decode(&blob.ciphertext_b64)?;

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut key);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| ConfigError::DecryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| ConfigError::DecryptionFailed("wrong password or corrupt blob".into()))?;

    String::from_utf8(plaintext).map_err(|e| ConfigError::DecryptionFailed(e.to_string()))
}

fn b64_decode(s: &str) -> Result<Vec<u8>, ConfigError> {
    base64_decode(s).map_err(|e| ConfigError::DecryptionFailed(format!("bad base64: {e}")))
}

// Minimal standard-alphabet base64 decoder — avoids pulling in the `base64`
// crate for three short fields.
fn base64_decode(input: &str) -> Result<Vec<u8>, &'static str> {
    fn val(b: u8) -> Result<u8, &'static str> {
        match b {
            b'A'..=b'Z' => Ok(b - b'A'),
            b'a'..=b'z' => Ok(b - b'a' + 26),
            b'0'..=b'9' => Ok(b - b'0' + 52),
            b'+' | b'-' => Ok(62),
            b'/' | b'_' => Ok(63),
            _ => Err("invalid base64 byte"),
        }
    }
    let cleaned: Vec<u8> = input.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(cleaned.len() * 3 / 4);
    for chunk in cleaned.chunks(4) {
        let mut buf = [0u8; 4];
        for (i, &b) in chunk.iter().enumerate() {
            buf[i] = val(b)?;
        }
        let n = (buf[0] as u32) << 18 | (buf[1] as u32) << 12 | (buf[2] as u32) << 6 | buf[3] as u32;
        out.push((n >> 16) as u8);
        if chunk.len() > 2 {
            out.push((n >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(n as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_passphrase_resolves_directly() {
        let cfg = PassphraseConfig::Passphrase { passphrase: "hunter2".into() };
        assert_eq!(cfg.resolve().unwrap(), "hunter2");
    }
}
