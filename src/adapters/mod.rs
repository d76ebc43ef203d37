//! Channel adapter abstraction
//!
//! Defines the standard interface that all channel adapter implementations
//! must follow, the normalized product/order shapes they return, and the
//! structured error vocabulary the sync executor classifies on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod registry;
pub mod sigv4;
pub mod util;

pub mod aliexpress;
pub mod amazon;
pub mod bol_com;
pub mod ebay;
pub mod ekm;
pub mod etsy;
pub mod facebook_shops;
pub mod flipkart;
pub mod groupon;
pub mod lazada;
pub mod magento;
pub mod magento2;
pub mod mercado_libre;
pub mod nopcommerce;
pub mod onbuy;
pub mod opencart;
pub mod oscommerce;
pub mod ozon;
pub mod prestashop;
pub mod reverb;
pub mod shopify;
pub mod threedcart;
pub mod trademe;
pub mod wayfair;
pub mod wish;
pub mod wix;
pub mod woocommerce;
pub mod xcart;
pub mod zencart;

pub use registry::{AuthKind, ChannelMetadata, Registry, RegistryError, WebhookScheme};

/// Adapter-specific error types for structured error handling
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// Missing or invalid adapter configuration (never retried)
    Configuration { details: String },
    /// Non-2xx HTTP response from the channel
    Http { status: u16, body: Option<String> },
    /// Network or connectivity error
    Network { details: String, retryable: bool },
    /// Response body did not match the expected shape
    Malformed { details: String },
    /// The channel reported an order status outside the adapter's mapping
    UnmappedStatus { channel: String, value: String },
    /// Rate limiting error with optional retry hint
    RateLimited { retry_after: Option<u64> },
}

impl AdapterError {
    pub fn configuration<S: Into<String>>(details: S) -> Self {
        AdapterError::Configuration {
            details: details.into(),
        }
    }

    pub fn malformed<S: Into<String>>(details: S) -> Self {
        AdapterError::Malformed {
            details: details.into(),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::Configuration { details } => {
                write!(f, "Configuration error: {}", details)
            }
            AdapterError::Http { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            AdapterError::Network { details, .. } => write!(f, "Network error: {}", details),
            AdapterError::Malformed { details } => write!(f, "Malformed response: {}", details),
            AdapterError::UnmappedStatus { channel, value } => {
                write!(f, "Unmapped {} order status: {}", channel, value)
            }
            AdapterError::RateLimited { retry_after } => {
                write!(f, "Rate limit exceeded")?;
                if let Some(after) = retry_after {
                    write!(f, " (retry after: {}s)", after)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AdapterError {}

/// Sync-specific error types for structured error handling during sync runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    #[serde(flatten)]
    pub kind: SyncErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Authentication/authorization failure
    Unauthorized,
    /// Rate limited with optional retry after hint
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Transient/retryable error
    Transient,
    /// Permanent/non-retryable error
    Permanent,
}

impl SyncError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Unauthorized,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self {
            kind: SyncErrorKind::RateLimited { retry_after_secs },
            message: None,
            details: None,
        }
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Transient,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Permanent,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SyncErrorKind::Unauthorized => write!(f, "Unauthorized")?,
            SyncErrorKind::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(after) = retry_after_secs {
                    write!(f, " (retry after: {}s)", after)?;
                }
            }
            SyncErrorKind::Transient => write!(f, "Transient error")?,
            SyncErrorKind::Permanent => write!(f, "Permanent error")?,
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {}

impl From<AdapterError> for SyncError {
    fn from(adapter_error: AdapterError) -> Self {
        match adapter_error {
            AdapterError::RateLimited { retry_after } => SyncError::rate_limited(retry_after),
            AdapterError::Network { details, retryable } => {
                if retryable {
                    SyncError::transient(details)
                } else {
                    SyncError::permanent(details)
                }
            }
            AdapterError::Http { status, body } => {
                let message = format!("HTTP error {}: {}", status, body.unwrap_or_default());
                match status {
                    401 | 403 => SyncError::unauthorized(message),
                    429 => SyncError::rate_limited(None),
                    400..=499 => SyncError::permanent(message),
                    _ => SyncError::transient(message),
                }
            }
            AdapterError::Malformed { details } => {
                SyncError::transient(format!("Malformed response: {}", details))
            }
            AdapterError::Configuration { details } => {
                SyncError::permanent(format!("Configuration error: {}", details))
            }
            AdapterError::UnmappedStatus { channel, value } => SyncError::permanent(format!(
                "Unmapped {} order status: {}",
                channel, value
            )),
        }
    }
}

/// Cursor for incremental sync operations.
///
/// Wraps an opaque JSON payload owned by the adapter. The payload may be a
/// primitive or structured object and must round-trip without alteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SyncCursor(pub JsonValue);

impl SyncCursor {
    /// Construct a cursor from any JSON value.
    pub fn from_json(value: JsonValue) -> Self {
        Self(value)
    }

    /// Convenience helper to build a string cursor.
    pub fn from_string<S: Into<String>>(value: S) -> Self {
        Self(JsonValue::String(value.into()))
    }

    /// Borrow the underlying JSON value.
    pub fn as_json(&self) -> &JsonValue {
        &self.0
    }

    /// Attempt to access the cursor as a string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

impl From<SyncCursor> for JsonValue {
    fn from(cursor: SyncCursor) -> Self {
        cursor.0
    }
}

impl From<JsonValue> for SyncCursor {
    fn from(value: JsonValue) -> Self {
        SyncCursor::from_json(value)
    }
}

/// Engine order status vocabulary.
///
/// Each adapter owns an exhaustive mapping from its channel's native
/// statuses into this set; anything outside the mapping is an
/// `AdapterError::UnmappedStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Stable string form stored in `channel_orders.status`
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

/// Normalized product variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: String,
    pub name: Option<String>,
    pub price: Option<String>,
    pub sku: Option<String>,
    pub stock: Option<i64>,
}

/// Normalized product shape returned by `fetch_products`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Decimal string rounded to two places
    pub price: Option<String>,
    pub currency: Option<String>,
    pub sku: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub stock_quantity: Option<i64>,
    pub categories: Vec<String>,
    pub brand: Option<String>,
    pub variants: Vec<ProductVariant>,
}

/// Normalized shipping address
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Normalized order line item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub quantity: i64,
    pub price: Option<String>,
}

/// Normalized order shape returned by `fetch_orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: Option<String>,
    pub status: OrderStatus,
    /// Decimal string rounded to two places
    pub total: String,
    pub currency: String,
    /// True when the adapter had to fall back to the channel default currency
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub currency_defaulted: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<Address>,
    pub line_items: Vec<LineItem>,
    /// The channel's raw order payload, stored verbatim in the ledger
    pub raw: JsonValue,
}

/// One page of orders from `fetch_orders`
#[derive(Debug, Clone)]
pub struct FetchOrdersPage {
    pub orders: Vec<Order>,
    pub next_cursor: Option<SyncCursor>,
    pub has_more: bool,
}

impl FetchOrdersPage {
    /// A terminal page with no follow-up cursor
    pub fn done(orders: Vec<Order>) -> Self {
        Self {
            orders,
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Decrypted credential and connection material handed to adapter constructors.
///
/// Channel-specific extras (marketplace ids, consumer secrets, regions) live
/// in `metadata`, which mirrors the connection's non-secret metadata column.
#[derive(Debug, Clone, Default)]
pub struct AdapterContext {
    /// External account identifier (shop domain, seller id, store hash)
    pub external_id: String,
    /// Base store URL for self-hosted channels
    pub store_url: Option<String>,
    pub access_token: Option<String>,
    pub api_key: Option<String>,
    pub metadata: JsonValue,
}

impl AdapterContext {
    /// Read a string extra from the connection metadata
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Require a credential field, mapping absence to a configuration error
    pub fn require<'a>(
        &self,
        value: Option<&'a str>,
        what: &str,
        channel: &str,
    ) -> Result<&'a str, AdapterError> {
        value.ok_or_else(|| AdapterError::configuration(format!("{} requires {}", channel, what)))
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable channel slug (matches `channel_connections.channel_type`)
    fn channel(&self) -> &'static str;

    /// Fetch the channel's product catalog in normalized form.
    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError>;

    /// Fetch orders since the given cursor.
    ///
    /// Adapters that paginate internally exhaust all pages and return
    /// `has_more = false`; adapters surfacing channel-native cursors return
    /// one page at a time.
    async fn fetch_orders(&self, since: Option<&SyncCursor>)
    -> Result<FetchOrdersPage, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_http_error_classifies_by_status() {
        let unauthorized: SyncError = AdapterError::Http {
            status: 401,
            body: None,
        }
        .into();
        assert_eq!(unauthorized.kind, SyncErrorKind::Unauthorized);

        let rate_limited: SyncError = AdapterError::Http {
            status: 429,
            body: None,
        }
        .into();
        assert!(matches!(
            rate_limited.kind,
            SyncErrorKind::RateLimited { .. }
        ));

        let permanent: SyncError = AdapterError::Http {
            status: 404,
            body: Some("not found".to_string()),
        }
        .into();
        assert_eq!(permanent.kind, SyncErrorKind::Permanent);

        let transient: SyncError = AdapterError::Http {
            status: 503,
            body: None,
        }
        .into();
        assert_eq!(transient.kind, SyncErrorKind::Transient);
    }

    #[test]
    fn unmapped_status_is_permanent() {
        let err: SyncError = AdapterError::UnmappedStatus {
            channel: "etsy".to_string(),
            value: "weird".to_string(),
        }
        .into();
        assert_eq!(err.kind, SyncErrorKind::Permanent);
        assert!(err.message.unwrap().contains("weird"));
    }

    #[test]
    fn sync_error_serializes_with_type_tag() {
        let err = SyncError::rate_limited(Some(30));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "rate_limited");
        assert_eq!(json["retry_after_secs"], 30);

        let parsed: SyncError = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn cursor_roundtrips_arbitrary_json() {
        let cursor = SyncCursor::from_json(serde_json::json!({ "NextToken": "abc", "page": 3 }));
        let value: JsonValue = cursor.clone().into();
        assert_eq!(SyncCursor::from(value), cursor);

        let plain = SyncCursor::from_string("2025-01-01T00:00:00Z");
        assert_eq!(plain.as_str(), Some("2025-01-01T00:00:00Z"));
    }
}
