//! EKM channel adapter
//!
//! Hosted UK platform; the API key rides as a query parameter against the
//! store's own domain.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const PAGE_LIMIT: usize = 50;

pub struct EkmAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EkmAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .api_key
            .as_deref()
            .or(ctx.access_token.as_deref())
            .ok_or_else(|| AdapterError::configuration("ekm requires an api key"))?
            .to_string();
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "ekm")?
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
        })
    }

    async fn get(&self, path: &str, extra: &str) -> Result<JsonValue, AdapterError> {
        let url = format!(
            "{}{}?api_key={}&limit={}{}",
            self.base_url, path, self.api_key, PAGE_LIMIT, extra
        );
        send_json(self.client.get(url)).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "order received" | "pending" | "awaiting payment" => Ok(OrderStatus::Pending),
        "processing" | "being processed" => Ok(OrderStatus::Processing),
        "dispatched" | "shipped" => Ok(OrderStatus::Shipped),
        "complete" | "completed" | "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "ekm".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for EkmAdapter {
    fn channel(&self) -> &'static str {
        "ekm"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get("/api/products", &format!("&offset={}", offset))
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
            let id = util::get_str(item, "id")
                .ok_or_else(|| AdapterError::malformed("ekm product missing id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "title").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item.get("price").and_then(util::parse_price),
                currency: util::get_str(item, "currency").or(Some("GBP".to_string())),
                sku: util::get_str(item, "sku").filter(|s| !s.is_empty()),
                url: util::get_str(item, "url"),
                image_url: util::get_str(item, "images.0.url"),
                stock_quantity: util::get_i64(item, "stock_level"),
                categories: util::get_str(item, "category.name").into_iter().collect(),
                brand: util::get_str(item, "brand.name"),
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let extra = since
            .and_then(|c| c.as_str())
            .map(|watermark| format!("&updated_after={}", util::encode_query_value(watermark)))
            .unwrap_or_default();
        let data = self.get("/api/orders", &extra).await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "id")
                .ok_or_else(|| AdapterError::malformed("ekm order missing id"))?;
            let status_value =
                util::get_str(raw, "status").unwrap_or_else(|| "pending".to_string());
            let currency = util::get_str(raw, "currency");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: util::get_str(raw, "order_number").or(Some(id)),
                status: map_status(&status_value)?,
                total: raw
                    .get("total")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "GBP".to_string()),
                currency_defaulted,
                created_at: raw.get("created_at").and_then(util::parse_timestamp),
                updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "customer.email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
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
