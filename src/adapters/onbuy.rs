//! OnBuy channel adapter
//!
//! v2 API with a bearer api key, scoped to a site id (2000 is the UK site).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.onbuy.com";
const DEFAULT_SITE_ID: &str = "2000";
const PAGE_LIMIT: usize = 50;

pub struct OnBuyAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    site_id: String,
}

impl OnBuyAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "onbuy")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            site_id: ctx
                .meta_str("site_id")
                .unwrap_or(DEFAULT_SITE_ID)
                .to_string(),
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).bearer_auth(&self.api_key)).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "awaiting_payment" | "pending" => Ok(OrderStatus::Pending),
        "awaiting_dispatch" | "partially_dispatched" => Ok(OrderStatus::Processing),
        "dispatched" => Ok(OrderStatus::Shipped),
        "complete" | "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "cancelled_by_buyer" | "cancelled_by_seller" => Ok(OrderStatus::Cancelled),
        "refunded" | "partially_refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "onbuy".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for OnBuyAdapter {
    fn channel(&self) -> &'static str {
        "onbuy"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let url = format!(
                "{}/v2/products?site_id={}&limit={}&offset={}",
                self.base_url, self.site_id, PAGE_LIMIT, offset
            );
            let data = self.get(url).await?;
            Ok(data
                .get("results")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "product_id")
                .ok_or_else(|| AdapterError::malformed("onbuy product missing product_id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item
                    .get("price")
                    .and_then(|p| p.get("current_price"))
                    .and_then(util::parse_price),
                currency: util::get_str(item, "price.currency"),
                sku: util::get_str(item, "sku"),
                url: util::get_str(item, "product_url"),
                image_url: util::get_str(item, "images.0.url"),
                stock_quantity: util::get_i64(item, "stock.quantity"),
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
        // Offset paging carried in the cursor
        let offset = since.and_then(|c| c.as_json().as_u64()).unwrap_or(0) as usize;
        let url = format!(
            "{}/v2/orders?site_id={}&limit={}&offset={}",
            self.base_url, self.site_id, PAGE_LIMIT, offset
        );
        let data = self.get(url).await?;

        let items = data
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("onbuy order missing order_id"))?;
            let status_value = util::get_str(raw, "status").unwrap_or_else(|| "pending".to_string());
            let currency = util::get_str(raw, "price.currency")
                .or_else(|| util::get_str(raw, "currency"));
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: raw
                    .get("price")
                    .and_then(|p| p.get("total"))
                    .and_then(util::parse_price)
                    .or_else(|| raw.get("total").and_then(util::parse_price))
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "GBP".to_string()),
                currency_defaulted,
                created_at: raw.get("date").and_then(util::parse_timestamp),
                updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "buyer.email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        let has_more = items.len() >= PAGE_LIMIT;
        let next_cursor = has_more
            .then(|| SyncCursor::from_json(serde_json::json!(offset + items.len())));

        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
