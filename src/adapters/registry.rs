//! Channel registry
//!
//! Static metadata for every supported channel plus the constructor
//! dispatch that turns a connection's decrypted credentials into a live
//! adapter instance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{AdapterContext, AdapterError, ChannelAdapter};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Channel '{name}' not found")]
    ChannelNotFound { name: String },
}

/// Authentication style a channel uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// OAuth 2.0 authorization code or client-credentials flow
    OAuth2,
    /// Static API key or personal access token
    ApiKey,
    /// HTTP basic authentication
    BasicAuth,
    /// Per-request signing (SigV4, OAuth1, MD5/HMAC query signatures)
    Signed,
}

/// Webhook signature scheme a channel delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookScheme {
    /// `X-Shopify-Hmac-Sha256`, base64 HMAC-SHA256 of the raw body
    ShopifyHmac,
    /// `X-WC-Webhook-Signature`, base64 HMAC-SHA256 of the raw body
    WooSignature,
    /// `X-Webhook-Signature: sha256=<hex>` over the raw body
    GenericSha256,
    /// Channel does not deliver webhooks
    None,
}

/// Metadata about a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Stable slug (matches `channel_connections.channel_type`)
    pub slug: &'static str,
    /// Human-readable channel name
    pub display_name: &'static str,
    /// Authentication style
    pub auth: AuthKind,
    /// Fallback currency when order payloads omit one
    pub default_currency: &'static str,
    /// Webhook signature scheme
    pub webhook_scheme: WebhookScheme,
}

type Builder = fn(AdapterContext) -> Result<Box<dyn ChannelAdapter>, AdapterError>;

/// Channel registry storing metadata and adapter constructors
pub struct Registry {
    metadata: HashMap<&'static str, ChannelMetadata>,
    builders: HashMap<&'static str, Builder>,
}

macro_rules! register {
    ($reg:expr, $slug:literal, $name:literal, $auth:expr, $currency:literal, $scheme:expr, $module:ident :: $adapter:ident) => {
        $reg.metadata.insert(
            $slug,
            ChannelMetadata {
                slug: $slug,
                display_name: $name,
                auth: $auth,
                default_currency: $currency,
                webhook_scheme: $scheme,
            },
        );
        $reg.builders.insert($slug, |ctx: AdapterContext| {
            Ok(Box::new(super::$module::$adapter::new(&ctx)?) as Box<dyn ChannelAdapter>)
        });
    };
}

impl Registry {
    /// Create a registry with every supported channel registered
    pub fn new() -> Self {
        use AuthKind::*;
        use WebhookScheme::*;

        let mut reg = Self {
            metadata: HashMap::new(),
            builders: HashMap::new(),
        };

        register!(reg, "shopify", "Shopify", OAuth2, "USD", ShopifyHmac, shopify::ShopifyAdapter);
        register!(reg, "amazon", "Amazon Selling Partner", Signed, "USD", GenericSha256, amazon::AmazonAdapter);
        register!(reg, "ebay", "eBay", OAuth2, "USD", GenericSha256, ebay::EbayAdapter);
        register!(reg, "etsy", "Etsy", ApiKey, "USD", GenericSha256, etsy::EtsyAdapter);
        register!(reg, "woocommerce", "WooCommerce", BasicAuth, "USD", WooSignature, woocommerce::WooCommerceAdapter);
        register!(reg, "magento", "Magento", ApiKey, "USD", GenericSha256, magento::MagentoAdapter);
        register!(reg, "magento2", "Magento 2", ApiKey, "USD", GenericSha256, magento2::Magento2Adapter);
        register!(reg, "wix", "Wix Stores", ApiKey, "USD", GenericSha256, wix::WixAdapter);
        register!(reg, "prestashop", "PrestaShop", BasicAuth, "EUR", GenericSha256, prestashop::PrestaShopAdapter);
        register!(reg, "mercado_libre", "Mercado Libre", OAuth2, "ARS", GenericSha256, mercado_libre::MercadoLibreAdapter);
        register!(reg, "lazada", "Lazada", Signed, "USD", GenericSha256, lazada::LazadaAdapter);
        register!(reg, "ozon", "Ozon", ApiKey, "RUB", GenericSha256, ozon::OzonAdapter);
        register!(reg, "flipkart", "Flipkart", OAuth2, "INR", GenericSha256, flipkart::FlipkartAdapter);
        register!(reg, "wayfair", "Wayfair", OAuth2, "USD", GenericSha256, wayfair::WayfairAdapter);
        register!(reg, "reverb", "Reverb", ApiKey, "USD", GenericSha256, reverb::ReverbAdapter);
        register!(reg, "trademe", "Trade Me", Signed, "NZD", GenericSha256, trademe::TradeMeAdapter);
        register!(reg, "onbuy", "OnBuy", ApiKey, "GBP", GenericSha256, onbuy::OnBuyAdapter);
        register!(reg, "ekm", "EKM", OAuth2, "GBP", GenericSha256, ekm::EkmAdapter);
        register!(reg, "opencart", "OpenCart", ApiKey, "USD", GenericSha256, opencart::OpenCartAdapter);
        register!(reg, "oscommerce", "osCommerce", BasicAuth, "USD", GenericSha256, oscommerce::OsCommerceAdapter);
        register!(reg, "zencart", "Zen Cart", BasicAuth, "USD", GenericSha256, zencart::ZenCartAdapter);
        register!(reg, "xcart", "X-Cart", ApiKey, "USD", GenericSha256, xcart::XCartAdapter);
        register!(reg, "threedcart", "Shift4Shop (3dcart)", ApiKey, "USD", GenericSha256, threedcart::ThreeDCartAdapter);
        register!(reg, "nopcommerce", "nopCommerce", ApiKey, "USD", GenericSha256, nopcommerce::NopCommerceAdapter);
        register!(reg, "bol_com", "Bol.com", OAuth2, "EUR", GenericSha256, bol_com::BolComAdapter);
        register!(reg, "facebook_shops", "Facebook Shops", OAuth2, "USD", GenericSha256, facebook_shops::FacebookShopsAdapter);
        register!(reg, "groupon", "Groupon Goods", ApiKey, "USD", GenericSha256, groupon::GrouponAdapter);
        register!(reg, "wish", "Wish", ApiKey, "USD", GenericSha256, wish::WishAdapter);
        register!(reg, "aliexpress", "AliExpress", Signed, "USD", GenericSha256, aliexpress::AliExpressAdapter);

        reg
    }

    /// Get metadata for a specific channel
    pub fn get_metadata(&self, slug: &str) -> Result<&ChannelMetadata, RegistryError> {
        self.metadata
            .get(slug)
            .ok_or_else(|| RegistryError::ChannelNotFound {
                name: slug.to_string(),
            })
    }

    /// Get metadata for all channels, sorted by slug for stable ordering
    pub fn list_metadata(&self) -> Vec<&ChannelMetadata> {
        let mut metadata: Vec<_> = self.metadata.values().collect();
        metadata.sort_by(|a, b| a.slug.cmp(b.slug));
        metadata
    }

    /// Check if a channel uses OAuth2 flows
    pub fn is_oauth_channel(&self, slug: &str) -> bool {
        self.metadata
            .get(slug)
            .is_some_and(|m| matches!(m.auth, AuthKind::OAuth2))
    }

    /// Fallback currency for a channel, used when payloads omit one
    pub fn default_currency(&self, slug: &str) -> &'static str {
        self.metadata
            .get(slug)
            .map(|m| m.default_currency)
            .unwrap_or("USD")
    }

    /// Construct an adapter for a channel from connection context
    pub fn build_adapter(
        &self,
        slug: &str,
        ctx: AdapterContext,
    ) -> Result<Box<dyn ChannelAdapter>, AdapterError> {
        let builder = self.builders.get(slug).ok_or_else(|| {
            AdapterError::configuration(format!("unknown channel '{}'", slug))
        })?;
        builder(ctx)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
