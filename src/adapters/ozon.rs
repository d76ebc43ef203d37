//! Ozon channel adapter
//!
//! Seller API authenticated with the `Client-Id`/`Api-Key` header pair.
//! Endpoints are POST with JSON filters; orders come from the FBS posting
//! list.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api-seller.ozon.ru";
const PAGE_LIMIT: usize = 100;

pub struct OzonAdapter {
    client: Client,
    base_url: String,
    client_id: String,
    api_key: String,
}

impl OzonAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "ozon")?
            .to_string();
        let client_id = if !ctx.external_id.is_empty() {
            ctx.external_id.clone()
        } else {
            ctx.require(ctx.meta_str("client_id"), "a client id", "ozon")?
                .to_string()
        };

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client_id,
            api_key,
        })
    }

    async fn post(&self, path: &str, body: JsonValue) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .post(format!("{}{}", self.base_url, path))
                .header("Client-Id", &self.client_id)
                .header("Api-Key", &self.api_key)
                .json(&body),
        )
        .await
    }

    fn map_posting(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "posting_number")
            .ok_or_else(|| AdapterError::malformed("ozon posting missing posting_number"))?;

        let status_value = util::get_str(raw, "status").unwrap_or_else(|| "awaiting_packaging".to_string());
        let status = map_status(&status_value)?;

        let line_items = raw
            .get("products")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| LineItem {
                        product_id: util::get_str(item, "sku"),
                        variant_id: None,
                        sku: util::get_str(item, "offer_id"),
                        name: util::get_str(item, "name"),
                        quantity: util::get_i64(item, "quantity").unwrap_or(1),
                        price: item.get("price").and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Order {
            id: id.clone(),
            order_number: Some(id),
            status,
            total: raw
                .get("analytics_data")
                .and_then(|a| a.get("revenue"))
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            // The posting list reports rubles only
            currency: "RUB".to_string(),
            currency_defaulted: false,
            created_at: raw.get("created_at").and_then(util::parse_timestamp),
            updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
            customer_email: None,
            shipping_address: None,
            line_items,
            raw: raw.clone(),
        })
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "acceptance_in_progress" | "awaiting_approve" | "awaiting_registration" => {
            Ok(OrderStatus::Pending)
        }
        "awaiting_packaging" | "awaiting_deliver" => Ok(OrderStatus::Processing),
        "delivering" | "driver_pickup" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "not_accepted" => Ok(OrderStatus::Cancelled),
        "arbitration" | "client_arbitration" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "ozon".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for OzonAdapter {
    fn channel(&self) -> &'static str {
        "ozon"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut last_id = String::new();
        loop {
            let data = self
                .post(
                    "/v2/product/list",
                    json!({
                        "filter": { "visibility": "ALL" },
                        "last_id": last_id,
                        "limit": PAGE_LIMIT
                    }),
                )
                .await?;

            let batch = data
                .get("result")
                .and_then(|r| r.get("items"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            last_id = util::get_str(&data, "result.last_id").unwrap_or_default();
            if batch_len < PAGE_LIMIT || last_id.is_empty() {
                break;
            }
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "product_id")
                .ok_or_else(|| AdapterError::malformed("ozon product missing product_id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "name").unwrap_or_default(),
                price: item.get("price").and_then(util::parse_price),
                currency: Some("RUB".to_string()),
                sku: util::get_str(item, "offer_id"),
                url: Some(format!("https://www.ozon.ru/product/{}", id)),
                image_url: util::get_str(item, "images.0.url")
                    .or_else(|| util::get_str(item, "primary_image")),
                stock_quantity: util::get_i64(item, "stocks.0.present"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let since_ts = since
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| (Utc::now() - Duration::days(30)).to_rfc3339());

        let data = self
            .post(
                "/v3/posting/fbs/list",
                json!({
                    "filter": { "since": since_ts, "to": Utc::now().to_rfc3339() },
                    "limit": PAGE_LIMIT
                }),
            )
            .await?;

        let postings = data
            .get("result")
            .and_then(|r| r.get("postings"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(postings.len());
        for raw in &postings {
            orders.push(self.map_posting(raw)?);
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.created_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = data
            .get("result")
            .and_then(|r| r.get("has_next"))
            .and_then(|v| v.as_bool())
            .unwrap_or(postings.len() >= PAGE_LIMIT);

        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
