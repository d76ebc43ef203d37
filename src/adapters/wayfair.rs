//! Wayfair channel adapter
//!
//! Partner API with an OAuth bearer token and the partner client id header.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.wayfair.com";

pub struct WayfairAdapter {
    client: Client,
    base_url: String,
    access_token: String,
    client_id: Option<String>,
}

impl WayfairAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "wayfair")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token,
            client_id: ctx.meta_str("client_id").map(str::to_string),
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        let mut request = self.client.get(url).bearer_auth(&self.access_token);
        if let Some(client_id) = &self.client_id {
            request = request.header("X-Wayfair-Client-Id", client_id);
        }
        send_json(request).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "open" | "new" | "accepted" => Ok(OrderStatus::Pending),
        "in_progress" | "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "rejected" => Ok(OrderStatus::Cancelled),
        "returned" | "refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "wayfair".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for WayfairAdapter {
    fn channel(&self) -> &'static str {
        "wayfair"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(format!(
                    "{}/v1/products?limit={}&offset={}",
                    self.base_url, PAGE_LIMIT, offset
                ))
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
                .ok_or_else(|| AdapterError::malformed("wayfair product missing product_id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item.get("price").and_then(util::parse_price),
                currency: util::get_str(item, "currency"),
                sku: util::get_str(item, "supplier_part_number"),
                url: util::get_str(item, "product_url"),
                image_url: util::get_str(item, "image_url"),
                stock_quantity: util::get_i64(item, "quantity_available"),
                categories: item
                    .get("category_hierarchy")
                    .and_then(|v| v.as_array())
                    .map(|cats| {
                        cats.iter()
                            .filter_map(|c| c.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                brand: util::get_str(item, "brand"),
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!("{}/v1/orders", self.base_url);
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("?updated_after={}", util::encode_query_value(watermark)));
        }

        let data = self.get(url).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("wayfair order missing order_id"))?;
            let status_value = util::get_str(raw, "status").unwrap_or_else(|| "open".to_string());
            let currency = util::get_str(raw, "currency");
            let currency_defaulted = currency.is_none();

            let line_items = raw
                .get("items")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|item| LineItem {
                            product_id: util::get_str(item, "product_id"),
                            variant_id: None,
                            sku: util::get_str(item, "supplier_part_number"),
                            name: util::get_str(item, "name"),
                            quantity: util::get_i64(item, "quantity").unwrap_or(1),
                            price: item.get("price").and_then(util::parse_price),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            orders.push(Order {
                id: id.clone(),
                order_number: util::get_str(raw, "po_number").or(Some(id)),
                status: map_status(&status_value)?,
                total: raw
                    .get("total")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("created_at").and_then(util::parse_timestamp),
                updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more: false,
        })
    }
}
