//! Magento (1.x REST) channel adapter
//!
//! Legacy REST surface with a bearer access token. The v1 API reports no
//! currency on products or orders, so everything falls back to the channel
//! default.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const PAGE_LIMIT: usize = 100;

pub struct MagentoAdapter {
    client: Client,
    base_url: String,
    access_token: String,
}

impl MagentoAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "magento")?
            .trim_end_matches('/')
            .to_string();
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "magento")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            access_token,
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).bearer_auth(&self.access_token)).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "pending" | "pending_payment" | "payment_review" | "holded" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "complete" => Ok(OrderStatus::Delivered),
        "closed" => Ok(OrderStatus::Refunded),
        "canceled" | "fraud" => Ok(OrderStatus::Cancelled),
        other => Err(AdapterError::UnmappedStatus {
            channel: "magento".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for MagentoAdapter {
    fn channel(&self) -> &'static str {
        "magento"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/rest/V1/products?searchCriteria[pageSize]={}&searchCriteria[currentPage]={}",
                self.base_url, PAGE_LIMIT, page
            );
            let data = self.get(url).await?;
            let batch = data
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| AdapterError::malformed("magento products response missing items"))?;
            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PAGE_LIMIT {
                break;
            }
            page += 1;
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "id")
                .ok_or_else(|| AdapterError::malformed("magento product missing id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                price: item.get("price").and_then(util::parse_price),
                sku: util::get_str(item, "sku"),
                stock_quantity: util::get_i64(item, "extension_attributes.stock_item.qty"),
                url: util::get_str(item, "url_key")
                    .map(|key| format!("{}/{}", self.base_url, key)),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!(
            "{}/rest/V1/orders?searchCriteria[pageSize]={}",
            self.base_url, PAGE_LIMIT
        );
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!(
                "&searchCriteria[filterGroups][0][filters][0][field]=updated_at\
                 &searchCriteria[filterGroups][0][filters][0][value]={}\
                 &searchCriteria[filterGroups][0][filters][0][conditionType]=gt",
                watermark
            ));
        }

        let data = self.get(url).await?;
        let items = data
            .get("items")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("magento orders response missing items"))?;

        let mut orders = Vec::with_capacity(items.len());
        for raw in items {
            let id = util::get_str(raw, "entity_id")
                .ok_or_else(|| AdapterError::malformed("magento order missing entity_id"))?;
            let status_value = util::get_str(raw, "status").unwrap_or_else(|| "pending".to_string());

            orders.push(Order {
                id,
                order_number: util::get_str(raw, "increment_id"),
                status: map_status(&status_value)?,
                total: raw
                    .get("grand_total")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: "USD".to_string(),
                currency_defaulted: true,
                created_at: raw.get("created_at").and_then(as_magento_datetime),
                updated_at: raw.get("updated_at").and_then(as_magento_datetime),
                customer_email: util::get_str(raw, "customer_email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.format("%Y-%m-%d %H:%M:%S").to_string()));

        let has_more = items.len() >= PAGE_LIMIT;
        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}

/// Magento timestamps are `YYYY-MM-DD HH:MM:SS` in UTC
fn as_magento_datetime(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    util::parse_timestamp(&JsonValue::String(s.replacen(' ', "T", 1) + "Z"))
}
