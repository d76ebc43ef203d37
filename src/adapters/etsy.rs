//! Etsy channel adapter
//!
//! Etsy v3 open API: listings and receipts for a shop, keyed by the
//! connection's shop id with an `x-api-key` keystring. Prices arrive as
//! `{amount, divisor}` minor-unit objects and timestamps as epoch seconds.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://openapi.etsy.com";
const PAGE_LIMIT: usize = 100;

pub struct EtsyAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    shop_id: String,
}

impl EtsyAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "etsy")?
            .to_string();
        if ctx.external_id.is_empty() {
            return Err(AdapterError::configuration("etsy requires a shop id"));
        }

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            shop_id: ctx.external_id.clone(),
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).header("x-api-key", &self.api_key)).await
    }

    fn map_receipt(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "receipt_id")
            .ok_or_else(|| AdapterError::malformed("etsy receipt missing receipt_id"))?;

        let total = raw
            .get("grandtotal")
            .and_then(util::parse_price)
            .unwrap_or_else(|| "0.00".to_string());
        let currency = raw.get("grandtotal").and_then(util::price_currency);
        let currency_defaulted = currency.is_none();

        Ok(Order {
            id: id.clone(),
            order_number: Some(id),
            status: map_status(raw)?,
            total,
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            currency_defaulted,
            created_at: raw.get("created_timestamp").and_then(util::parse_timestamp),
            updated_at: raw.get("updated_timestamp").and_then(util::parse_timestamp),
            customer_email: util::get_str(raw, "buyer_email"),
            shipping_address: None,
            line_items: Vec::new(),
            raw: raw.clone(),
        })
    }
}

/// Etsy receipts carry a status string plus shipped/paid flags; the flags
/// win when the status string is absent.
fn map_status(raw: &JsonValue) -> Result<OrderStatus, AdapterError> {
    if let Some(status) = util::get_str(raw, "status") {
        return match status.to_lowercase().as_str() {
            "open" | "unpaid" | "payment processing" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "completed" | "fully refunded" => Ok(OrderStatus::Refunded),
            "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(AdapterError::UnmappedStatus {
                channel: "etsy".to_string(),
                value: other.to_string(),
            }),
        };
    }
    if raw.get("is_shipped").and_then(|v| v.as_bool()) == Some(true) {
        Ok(OrderStatus::Shipped)
    } else if raw.get("is_paid").and_then(|v| v.as_bool()) == Some(true) {
        Ok(OrderStatus::Paid)
    } else {
        Ok(OrderStatus::Pending)
    }
}

#[async_trait]
impl ChannelAdapter for EtsyAdapter {
    fn channel(&self) -> &'static str {
        "etsy"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let results = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let url = format!(
                "{}/v3/application/shops/{}/listings/active?limit={}&offset={}",
                self.base_url, self.shop_id, PAGE_LIMIT, offset
            );
            let data = self.get(url).await?;
            data.get("results")
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| AdapterError::malformed("etsy listings response missing results"))
        })
        .await?;

        let mut products = Vec::with_capacity(results.len());
        for listing in &results {
            let id = util::get_str(listing, "listing_id")
                .ok_or_else(|| AdapterError::malformed("etsy listing missing listing_id"))?;

            products.push(Product {
                id,
                name: util::get_str(listing, "title").unwrap_or_default(),
                description: util::get_str(listing, "description"),
                price: listing.get("price").and_then(util::parse_price),
                currency: listing.get("price").and_then(util::price_currency),
                sku: util::get_str(listing, "skus.0"),
                url: util::get_str(listing, "url"),
                image_url: util::get_str(listing, "images.0.url_570xN"),
                stock_quantity: util::get_i64(listing, "quantity"),
                categories: Vec::new(),
                brand: None,
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!(
            "{}/v3/application/shops/{}/receipts?limit={}",
            self.base_url, self.shop_id, PAGE_LIMIT
        );
        if let Some(min_created) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("&min_created={}", min_created));
        }

        let data = self.get(url).await?;
        let results = data
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("etsy receipts response missing results"))?;

        let mut orders = Vec::with_capacity(results.len());
        for receipt in results {
            orders.push(self.map_receipt(receipt)?);
        }

        // Epoch-seconds watermark for the next incremental pull
        let next_cursor = orders
            .iter()
            .filter_map(|o| o.created_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.timestamp().to_string()));

        let has_more = results.len() >= PAGE_LIMIT;
        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
