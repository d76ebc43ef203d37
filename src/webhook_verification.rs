//! # Webhook Signature Verification
//!
//! HMAC-SHA256 verification for inbound channel webhooks with
//! constant-time comparison, plus the fixed-window rate limiter guarding
//! the public webhook endpoints. Verification happens against the raw
//! request body before any JSON parsing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::adapters::registry::WebhookScheme;
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Webhook secret not configured for channel '{channel}'")]
    NotConfigured { channel: String },

    #[error("Channel '{channel}' does not deliver webhooks")]
    Unsupported { channel: String },
}

impl VerificationError {
    /// HTTP status a failed verification maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::Unsupported { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Verify a webhook delivery for the given channel.
///
/// Resolves the channel's signature scheme and shared secret, then checks
/// the scheme's header against an HMAC-SHA256 of the raw body. Returns
/// before any payload parsing on failure.
pub fn verify_webhook_signature(
    channel: &str,
    scheme: WebhookScheme,
    body: &[u8],
    headers: &HeaderMap,
    config: &AppConfig,
) -> VerificationResult<()> {
    debug!(
        channel = %channel,
        body_size = body.len(),
        "Verifying webhook signature"
    );

    match scheme {
        WebhookScheme::ShopifyHmac => {
            let secret = config.webhook_shopify_secret.as_deref().ok_or_else(|| {
                VerificationError::NotConfigured {
                    channel: channel.to_string(),
                }
            })?;
            let signature = header_value(headers, "x-shopify-hmac-sha256")?;
            verify_base64_hmac(body, signature, secret, "X-Shopify-Hmac-Sha256")
        }
        WebhookScheme::WooSignature => {
            let secret = config
                .webhook_woocommerce_secret
                .as_deref()
                .ok_or_else(|| VerificationError::NotConfigured {
                    channel: channel.to_string(),
                })?;
            let signature = header_value(headers, "x-wc-webhook-signature")?;
            verify_base64_hmac(body, signature, secret, "X-WC-Webhook-Signature")
        }
        WebhookScheme::GenericSha256 => {
            let secret = config.webhook_generic_secret.as_deref().ok_or_else(|| {
                VerificationError::NotConfigured {
                    channel: channel.to_string(),
                }
            })?;
            let signature = header_value(headers, "x-webhook-signature")?;
            verify_hex_hmac(body, signature, secret, "X-Webhook-Signature")
        }
        WebhookScheme::None => Err(VerificationError::Unsupported {
            channel: channel.to_string(),
        }),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> VerificationResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| VerificationError::MissingSignature {
            header: name.to_string(),
        })
}

/// Verify a base64-encoded HMAC-SHA256 signature over the raw body
/// (Shopify and WooCommerce deliveries).
pub fn verify_base64_hmac(
    body: &[u8],
    signature: &str,
    secret: &str,
    header: &str,
) -> VerificationResult<()> {
    let provided =
        BASE64
            .decode(signature)
            .map_err(|_| VerificationError::InvalidSignatureFormat {
                header: format!("{} contains invalid base64", header),
            })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq(expected.as_ref(), &provided)
}

/// Verify a `sha256=<hex>` signature over the raw body (generic scheme).
pub fn verify_hex_hmac(
    body: &[u8],
    signature: &str,
    secret: &str,
    header: &str,
) -> VerificationResult<()> {
    let hex_part = signature.strip_prefix("sha256=").ok_or_else(|| {
        VerificationError::InvalidSignatureFormat {
            header: format!("{} must start with 'sha256='", header),
        }
    })?;

    let provided =
        hex::decode(hex_part).map_err(|_| VerificationError::InvalidSignatureFormat {
            header: format!("{} contains invalid hex", header),
        })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq(expected.as_ref(), &provided)
}

fn constant_time_eq(expected: &[u8], provided: &[u8]) -> VerificationResult<()> {
    if expected.len() != provided.len() {
        return Err(VerificationError::VerificationFailed);
    }
    if subtle::ConstantTimeEq::ct_eq(expected, provided).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Fixed-window in-memory rate limiter for the public webhook endpoints,
/// keyed by `(channel, connection identifier)`.
///
/// Two windows: a per-minute allowance and a one-second burst cap.
#[derive(Debug)]
pub struct WebhookRateLimiter {
    per_minute: u32,
    burst_size: u32,
    windows: Mutex<HashMap<String, WindowState>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    minute: u64,
    minute_count: u32,
    second: u64,
    second_count: u32,
}

impl WebhookRateLimiter {
    pub fn new(per_minute: u32, burst_size: u32) -> Self {
        Self {
            per_minute,
            burst_size,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.webhook_rate_limit_per_minute,
            config.webhook_rate_limit_burst_size,
        )
    }

    /// Record one delivery attempt, returning true when it must be rejected
    pub fn is_limited(&self, channel: &str, key: &str) -> bool {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check(channel, key, now_secs)
    }

    fn check(&self, channel: &str, key: &str, now_secs: u64) -> bool {
        let minute = now_secs / 60;
        let full_key = format!("{}:{}", channel, key);

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned lock fails open rather than blocking ingestion
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = windows.entry(full_key).or_insert(WindowState {
            minute,
            minute_count: 0,
            second: now_secs,
            second_count: 0,
        });

        if entry.minute != minute {
            entry.minute = minute;
            entry.minute_count = 0;
        }
        if entry.second != now_secs {
            entry.second = now_secs;
            entry.second_count = 0;
        }

        if entry.minute_count >= self.per_minute || entry.second_count >= self.burst_size {
            return true;
        }

        entry.minute_count += 1;
        entry.second_count += 1;
        false
    }
}
