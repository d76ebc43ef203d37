//! X-Cart channel adapter
//!
//! REST API with a bearer api key against the store's own domain.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    ProductVariant, SyncCursor,
};

pub struct XCartAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl XCartAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "xcart")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "xcart")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
        })
    }

    async fn get(&self, path: &str) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .get(format!("{}{}", self.base_url, path))
                .bearer_auth(&self.api_key),
        )
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    // X-Cart order statuses are single letters in exports, words in the API
    match value {
        "I" | "Q" | "queued" | "incomplete" => Ok(OrderStatus::Pending),
        "P" | "processed" | "authorized" => Ok(OrderStatus::Paid),
        "shipped" => Ok(OrderStatus::Shipped),
        "C" | "complete" | "completed" => Ok(OrderStatus::Delivered),
        "D" | "declined" | "F" | "failed" | "canceled" | "cancelled" => Ok(OrderStatus::Cancelled),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "xcart".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for XCartAdapter {
    fn channel(&self) -> &'static str {
        "xcart"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!("/api/products?limit={}&offset={}", PAGE_LIMIT, offset))
                .await?;
            Ok(data
                .get("products")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "product_id")
                .ok_or_else(|| AdapterError::malformed("xcart product missing product_id"))?;

            let variants = item
                .get("variants")
                .and_then(|v| v.as_array())
                .map(|vs| {
                    vs.iter()
                        .map(|v| ProductVariant {
                            id: util::get_str(v, "variant_id").unwrap_or_default(),
                            name: util::get_str(v, "variant_name"),
                            price: v.get("variant_price").and_then(util::parse_price),
                            sku: util::get_str(v, "variant_sku"),
                            stock: util::get_i64(v, "variant_quantity"),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            products.push(Product {
                id,
                name: util::get_str(item, "product_name").unwrap_or_default(),
                description: util::get_str(item, "product_description"),
                price: item.get("product_price").and_then(util::parse_price),
                currency: util::get_str(item, "currency"),
                sku: util::get_str(item, "product_sku"),
                url: util::get_str(item, "product_clean_url")
                    .map(|slug| format!("{}/product/{}", self.base_url, slug)),
                image_url: util::get_str(item, "product_image")
                    .map(|img| format!("{}{}", self.base_url, img)),
                stock_quantity: util::get_i64(item, "product_quantity"),
                categories: item
                    .get("categories")
                    .and_then(|v| v.as_array())
                    .map(|cats| {
                        cats.iter()
                            .filter_map(|c| util::get_str(c, "category_name"))
                            .collect()
                    })
                    .unwrap_or_default(),
                brand: util::get_str(item, "brand_name"),
                variants,
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let data = self.get("/api/orders?limit=50").await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("xcart order missing order_id"))?;
            let status_value = util::get_str(raw, "status").unwrap_or_else(|| "queued".to_string());
            let currency = util::get_str(raw, "currency");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: raw
                    .get("total")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("date").and_then(util::parse_timestamp),
                updated_at: raw.get("last_updated").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        Ok(FetchOrdersPage::done(orders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_store_url_and_key() {
        assert!(XCartAdapter::new(&AdapterContext::default()).is_err());
        assert!(XCartAdapter::new(&AdapterContext {
            store_url: Some("https://shop.example.com".to_string()),
            api_key: Some("key".to_string()),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn status_mapping_accepts_letters_and_words() {
        assert_eq!(map_status("Q").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("P").unwrap(), OrderStatus::Paid);
        assert_eq!(map_status("complete").unwrap(), OrderStatus::Delivered);
        assert_eq!(map_status("D").unwrap(), OrderStatus::Cancelled);
        assert!(map_status("Z").is_err());
    }
}
