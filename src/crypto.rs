//! Credential encryption module using AES-256-GCM
//!
//! This module provides encryption and decryption utilities for access
//! tokens, refresh tokens, and API keys stored in the database, using
//! AES-256-GCM with additional authenticated data (AAD) for context binding.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::channel_connection::Model as ConnectionModel;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AAD binding a ciphertext to one connection's identity. Moving a
/// ciphertext between rows makes it undecryptable.
pub fn connection_aad(connection: &ConnectionModel) -> String {
    format!(
        "{}|{}|{}",
        connection.seller_id, connection.channel_type, connection.external_id
    )
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Prepend version byte and nonce to ciphertext
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Detect legacy plaintext payloads (no version marker)
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Ok(ciphertext.to_vec());
    }

    // Validate minimum length (version + nonce + tag)
    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let mut reconstructed = Vec::with_capacity(tag_and_ct.len());
    reconstructed.extend_from_slice(tag_and_ct);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &reconstructed,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// Decrypted credential material for a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSecrets {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub api_key: Option<String>,
}

/// Type alias for encrypted credential result
type EncryptedCredentials =
    Result<(Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>), CryptoError>;

/// Encrypt credential material for a connection model
pub fn encrypt_connection_secrets(
    key: &CryptoKey,
    connection: &ConnectionModel,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    api_key: Option<&str>,
) -> EncryptedCredentials {
    let aad = connection_aad(connection);

    let encrypted_access_token = access_token
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    let encrypted_refresh_token = refresh_token
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    let encrypted_api_key = api_key
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    Ok((
        encrypted_access_token,
        encrypted_refresh_token,
        encrypted_api_key,
    ))
}

fn decrypt_field(
    key: &CryptoKey,
    aad: &str,
    ciphertext: Option<&Vec<u8>>,
) -> Result<Option<String>, CryptoError> {
    match ciphertext {
        Some(token) if is_encrypted_payload(token) => decrypt_bytes(key, aad.as_bytes(), token)
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
            })
            .map(Some),
        Some(token) => String::from_utf8(token.clone())
            .map(Some)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e))),
        None => Ok(None),
    }
}

/// Decrypt credential material for a connection model
pub fn decrypt_connection_secrets(
    key: &CryptoKey,
    connection: &ConnectionModel,
) -> Result<ConnectionSecrets, CryptoError> {
    let aad = connection_aad(connection);

    Ok(ConnectionSecrets {
        access_token: decrypt_field(key, &aad, connection.access_token_ciphertext.as_ref())?,
        refresh_token: decrypt_field(key, &aad, connection.refresh_token_ciphertext.as_ref())?,
        api_key: decrypt_field(key, &aad, connection.api_key_ciphertext.as_ref())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn sample_connection(
        access_token_ciphertext: Option<Vec<u8>>,
        refresh_token_ciphertext: Option<Vec<u8>>,
    ) -> ConnectionModel {
        ConnectionModel {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            channel_type: "shopify".to_string(),
            external_id: "store-123.myshopify.com".to_string(),
            display_name: None,
            store_url: None,
            status: "connected".to_string(),
            active: true,
            access_token_ciphertext,
            refresh_token_ciphertext,
            api_key_ciphertext: None,
            expires_at: None,
            scopes: None,
            metadata: None,
            last_synced_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let aad1 = b"test-aad-1";
        let aad2 = b"test-aad-2";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad1, plaintext).expect("encryption succeeds");
        let result = decrypt_bytes(&key, aad2, &encrypted);

        assert!(result.is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let mut encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        encrypted[13] ^= 0x01;

        let result = decrypt_bytes(&key, aad, &encrypted);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_plaintext_works() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted1 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let encrypted2 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");

        // Nonces (bytes 1-13) should be different
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
        let decrypted1 = decrypt_bytes(&key, aad, &encrypted1).expect("decryption succeeds");
        let decrypted2 = decrypt_bytes(&key, aad, &encrypted2).expect("decryption succeeds");
        assert_eq!(decrypted1, plaintext);
        assert_eq!(decrypted2, plaintext);
    }

    #[test]
    fn test_legacy_token_passthrough() {
        let key = test_key();
        let aad = b"test-aad";
        let legacy_ciphertext = b"legacy-token".to_vec(); // No version marker

        let result =
            decrypt_bytes(&key, aad, &legacy_ciphertext).expect("legacy plaintext is returned");
        assert_eq!(result, legacy_ciphertext);
    }

    #[test]
    fn test_is_encrypted_payload_detection() {
        let key = test_key();
        let aad = b"test-aad";
        let encrypted = encrypt_bytes(&key, aad, b"secret").expect("encryption succeeds");

        assert!(is_encrypted_payload(&encrypted));
        assert!(!is_encrypted_payload(b"legacy"));
    }

    #[test]
    fn test_decrypt_connection_secrets_handles_legacy_plaintext() {
        let key = test_key();
        let mut connection = sample_connection(Some(b"legacy-access".to_vec()), None);
        let aad = connection_aad(&connection);

        let refresh_ciphertext =
            encrypt_bytes(&key, aad.as_bytes(), b"refresh-token").expect("encryption succeeds");
        connection.refresh_token_ciphertext = Some(refresh_ciphertext.clone());

        let secrets =
            decrypt_connection_secrets(&key, &connection).expect("decryption succeeds");

        assert_eq!(secrets.access_token.as_deref(), Some("legacy-access"));
        assert_eq!(secrets.refresh_token.as_deref(), Some("refresh-token"));
        assert!(is_encrypted_payload(&refresh_ciphertext));
        assert!(!is_encrypted_payload(b"legacy-access"));
    }

    #[test]
    fn test_encrypt_connection_secrets_roundtrip_with_api_key() {
        let key = test_key();
        let mut connection = sample_connection(None, None);

        let (access, refresh, api_key) = encrypt_connection_secrets(
            &key,
            &connection,
            Some("access-token"),
            None,
            Some("api-key-value"),
        )
        .expect("encryption succeeds");

        connection.access_token_ciphertext = access;
        connection.refresh_token_ciphertext = refresh;
        connection.api_key_ciphertext = api_key;

        let secrets =
            decrypt_connection_secrets(&key, &connection).expect("decryption succeeds");
        assert_eq!(secrets.access_token.as_deref(), Some("access-token"));
        assert_eq!(secrets.refresh_token, None);
        assert_eq!(secrets.api_key.as_deref(), Some("api-key-value"));
    }

    #[test]
    fn test_aad_binds_connection_identity() {
        let key = test_key();
        let mut connection = sample_connection(None, None);

        let (access, _, _) =
            encrypt_connection_secrets(&key, &connection, Some("access-token"), None, None)
                .expect("encryption succeeds");
        connection.access_token_ciphertext = access;

        // Moving the ciphertext to a different seller must fail
        connection.seller_id = Uuid::new_v4();
        let result = decrypt_connection_secrets(&key, &connection);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_versioned_payload_passthrough() {
        let key = test_key();
        let aad = b"test-aad";
        let invalid_ciphertext = vec![0xFF, 0x01, 0x02, 0x03]; // No 0x01 version marker

        let result = decrypt_bytes(&key, aad, &invalid_ciphertext)
            .expect("non-versioned payload returned as plaintext");
        assert_eq!(result, invalid_ciphertext);
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        let result = CryptoKey::new(vec![0u8; 16]);
        assert!(result.is_err());

        let result = CryptoKey::new(vec![0u8; 64]);
        assert!(result.is_err());
    }

    #[test]
    fn test_insufficient_ciphertext_length() {
        let key = test_key();
        let aad = b"test-aad";
        let short_ciphertext = vec![VERSION_ENCRYPTED, 0x02]; // Too short for nonce + tag

        let result = decrypt_bytes(&key, aad, &short_ciphertext);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }
}
