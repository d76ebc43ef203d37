//! Lazada channel adapter
//!
//! Open Platform API with per-request signing: parameters are sorted,
//! concatenated after the API path, and HMAC-SHA256 signed with the app
//! secret. App key/secret come from connection metadata.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value as JsonValue;
use sha2::Sha256;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    ProductVariant, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.lazada.com/rest";
const PAGE_LIMIT: usize = 50;

pub struct LazadaAdapter {
    client: Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    access_token: String,
}

impl LazadaAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "lazada")?
            .to_string();
        let app_key = ctx
            .require(ctx.meta_str("app_key"), "an app key", "lazada")?
            .to_string();
        let app_secret = ctx
            .require(ctx.meta_str("app_secret"), "an app secret", "lazada")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            app_key,
            app_secret,
            access_token,
        })
    }

    /// Sign `api_path` with the given extra parameters and return the full
    /// request URL.
    fn signed_url(&self, api_path: &str, extra: &[(&str, String)]) -> String {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let mut params: Vec<(String, String)> = vec![
            ("app_key".to_string(), self.app_key.clone()),
            ("access_token".to_string(), self.access_token.clone()),
            ("timestamp".to_string(), timestamp),
            ("sign_method".to_string(), "sha256".to_string()),
        ];
        for (k, v) in extra {
            params.push((k.to_string(), v.clone()));
        }
        params.sort();

        let mut base = api_path.to_string();
        for (k, v) in &params {
            base.push_str(k);
            base.push_str(v);
        }
        let sign = sign_sha256(&self.app_secret, &base);

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}{}?{}&sign={}", self.base_url, api_path, query, sign)
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "order_id")
            .or_else(|| util::get_str(raw, "order_number"))
            .ok_or_else(|| AdapterError::malformed("lazada order missing order_id"))?;

        let statuses = raw
            .get("statuses")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| util::get_str(raw, "status"))
            .unwrap_or_else(|| "pending".to_string());
        let status = map_status(&statuses)?;

        let currency = util::get_str(raw, "currency");
        let currency_defaulted = currency.is_none();

        Ok(Order {
            id: id.clone(),
            order_number: util::get_str(raw, "order_number").or(Some(id)),
            status,
            total: raw
                .get("price")
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            currency_defaulted,
            created_at: raw.get("created_at").and_then(util::parse_timestamp),
            updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
            customer_email: None,
            shipping_address: None,
            line_items: Vec::new(),
            raw: raw.clone(),
        })
    }
}

fn sign_sha256(secret: &str, base: &str) -> String {
    // Key length never exceeds the block size
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(base.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "unpaid" | "pending" | "packed" | "repacked" => Ok(OrderStatus::Pending),
        "ready_to_ship" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" | "confirmed" => Ok(OrderStatus::Delivered),
        "canceled" | "failed" | "lost_by_3pl" | "damaged_by_3pl" => Ok(OrderStatus::Cancelled),
        "returned" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "lazada".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for LazadaAdapter {
    fn channel(&self) -> &'static str {
        "lazada"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let url = self.signed_url(
                "/products/get",
                &[
                    ("limit", PAGE_LIMIT.to_string()),
                    ("offset", offset.to_string()),
                ],
            );
            let data = send_json(self.client.get(url)).await?;
            Ok(data
                .get("data")
                .and_then(|d| d.get("products"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "item_id")
                .ok_or_else(|| AdapterError::malformed("lazada product missing item_id"))?;

            let variants: Vec<ProductVariant> = item
                .get("skus")
                .and_then(|v| v.as_array())
                .map(|skus| {
                    skus.iter()
                        .map(|sku| ProductVariant {
                            id: util::get_str(sku, "sku_id").unwrap_or_default(),
                            name: util::get_str(sku, "SellerSku"),
                            price: sku.get("price").and_then(util::parse_price),
                            sku: util::get_str(sku, "SellerSku"),
                            stock: util::get_i64(sku, "quantity"),
                        })
                        .collect()
                })
                .unwrap_or_default();

            products.push(Product {
                id,
                name: util::get_str(item, "attributes.name").unwrap_or_default(),
                description: util::get_str(item, "attributes.description"),
                price: variants.first().and_then(|v| v.price.clone()),
                currency: util::get_str(item, "currency"),
                sku: variants.first().and_then(|v| v.sku.clone()),
                url: util::get_str(item, "attributes.url"),
                image_url: util::get_str(item, "images.0"),
                stock_quantity: variants.first().and_then(|v| v.stock),
                categories: util::get_str(item, "primary_category_name")
                    .into_iter()
                    .collect(),
                brand: util::get_str(item, "attributes.brand"),
                variants,
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut extra = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("offset", "0".to_string()),
            ("sort_by", "updated_at".to_string()),
        ];
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            extra.push(("update_after", watermark.to_string()));
        }

        let url = self.signed_url("/orders/get", &extra);
        let data = send_json(self.client.get(url)).await?;

        let items = data
            .get("data")
            .and_then(|d| d.get("orders"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            orders.push(self.map_order(raw)?);
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = items.len() >= PAGE_LIMIT;
        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> AdapterContext {
        AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({ "app_key": "100001", "app_secret": "shh" }),
            ..Default::default()
        }
    }

    #[test]
    fn new_requires_app_key_secret_and_token() {
        assert!(LazadaAdapter::new(&AdapterContext::default()).is_err());
        assert!(LazadaAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({ "app_key": "100001" }),
            ..Default::default()
        })
        .is_err());
        assert!(LazadaAdapter::new(&context()).is_ok());
    }

    #[test]
    fn signed_url_includes_sorted_params_and_signature() {
        let adapter = LazadaAdapter::new(&context()).unwrap();
        let url = adapter.signed_url("/orders/get", &[("limit", "50".to_string())]);

        assert!(url.contains("/orders/get?"));
        assert!(url.contains("app_key=100001"));
        assert!(url.contains("sign_method=sha256"));
        let sign = url.rsplit("sign=").next().unwrap();
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_deterministic_for_same_base() {
        assert_eq!(
            sign_sha256("secret", "/orders/getapp_key1"),
            sign_sha256("secret", "/orders/getapp_key1")
        );
        assert_ne!(
            sign_sha256("secret", "/orders/getapp_key1"),
            sign_sha256("other", "/orders/getapp_key1")
        );
    }

    #[test]
    fn status_mapping_covers_lazada_lifecycle() {
        assert_eq!(map_status("unpaid").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("ready_to_ship").unwrap(), OrderStatus::Processing);
        assert_eq!(map_status("shipped").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("returned").unwrap(), OrderStatus::Refunded);
        assert!(map_status("vanished").is_err());
    }
}
