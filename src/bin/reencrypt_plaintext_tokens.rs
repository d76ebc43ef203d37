//! One-shot migration tool that re-encrypts legacy plaintext credential
//! columns in place. Rows already carrying the versioned AES-GCM format
//! are left untouched, so the tool is safe to run repeatedly.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use channel_sync::{
    config::ConfigLoader,
    crypto::{CryptoKey, connection_aad, encrypt_bytes, is_encrypted_payload},
    db,
    models::channel_connection,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

#[tokio::main]
async fn main() -> Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().context("loading configuration")?;

    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let connections = channel_connection::Entity::find()
        .all(&db)
        .await
        .context("querying connections")?;

    let mut updated_count = 0usize;

    for conn in connections {
        let connection_id = conn.id;
        let aad = connection_aad(&conn);

        let mut new_access_cipher = None;
        if let Some(access) = conn.access_token_ciphertext.as_ref()
            && !access.is_empty()
            && !is_encrypted_payload(access)
        {
            let ciphertext = encrypt_bytes(&crypto_key, aad.as_bytes(), access).map_err(|err| {
                anyhow!(
                    "failed to encrypt access token for {}: {}",
                    connection_id,
                    err
                )
            })?;
            new_access_cipher = Some(ciphertext);
        }

        let mut new_refresh_cipher = None;
        if let Some(refresh) = conn.refresh_token_ciphertext.as_ref()
            && !refresh.is_empty()
            && !is_encrypted_payload(refresh)
        {
            let ciphertext =
                encrypt_bytes(&crypto_key, aad.as_bytes(), refresh).map_err(|err| {
                    anyhow!(
                        "failed to encrypt refresh token for {}: {}",
                        connection_id,
                        err
                    )
                })?;
            new_refresh_cipher = Some(ciphertext);
        }

        let mut new_api_key_cipher = None;
        if let Some(api_key) = conn.api_key_ciphertext.as_ref()
            && !api_key.is_empty()
            && !is_encrypted_payload(api_key)
        {
            let ciphertext =
                encrypt_bytes(&crypto_key, aad.as_bytes(), api_key).map_err(|err| {
                    anyhow!("failed to encrypt api key for {}: {}", connection_id, err)
                })?;
            new_api_key_cipher = Some(ciphertext);
        }

        if new_access_cipher.is_none()
            && new_refresh_cipher.is_none()
            && new_api_key_cipher.is_none()
        {
            continue;
        }

        let mut active: channel_connection::ActiveModel = conn.into();
        if let Some(cipher) = new_access_cipher {
            active.access_token_ciphertext = Set(Some(cipher));
        }
        if let Some(cipher) = new_refresh_cipher {
            active.refresh_token_ciphertext = Set(Some(cipher));
        }
        if let Some(cipher) = new_api_key_cipher {
            active.api_key_ciphertext = Set(Some(cipher));
        }
        active.updated_at = Set(Utc::now().into());

        active
            .update(&db)
            .await
            .with_context(|| format!("updating connection {}", connection_id))?;
        updated_count += 1;
    }

    println!(
        "Re-encrypted {} connection(s) containing legacy plaintext credentials.",
        updated_count
    );

    Ok(())
}
