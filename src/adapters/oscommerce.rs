//! osCommerce channel adapter
//!
//! Stock osCommerce has no REST API; this targets the common API extension
//! that serves `products.php`/`orders.php` behind basic auth plus an
//! `X-API-Key` header.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

pub struct OsCommerceAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    username: String,
    password: String,
}

impl OsCommerceAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "oscommerce")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "oscommerce")?
            .to_string();
        let username = ctx
            .require(ctx.meta_str("api_username"), "an api username", "oscommerce")?
            .to_string();
        let password = ctx
            .require(ctx.access_token.as_deref(), "an api password", "oscommerce")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
            username,
            password,
        })
    }

    async fn get(&self, path: &str) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .get(format!("{}{}", self.base_url, path))
                .basic_auth(&self.username, Some(&self.password))
                .header("X-API-Key", &self.api_key),
        )
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "pending" | "preparing" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "oscommerce".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for OsCommerceAdapter {
    fn channel(&self) -> &'static str {
        "oscommerce"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!("/api/products.php?limit={}&offset={}", PAGE_LIMIT, offset))
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
            let id = util::get_str(item, "products_id")
                .ok_or_else(|| AdapterError::malformed("oscommerce product missing products_id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "products_name").unwrap_or_default(),
                description: util::get_str(item, "products_description"),
                price: item.get("products_price").and_then(util::parse_price),
                sku: util::get_str(item, "products_model"),
                url: Some(format!(
                    "{}/product_info.php?products_id={}",
                    self.base_url, id
                )),
                image_url: util::get_str(item, "products_image")
                    .map(|img| format!("{}/images/{}", self.base_url, img)),
                stock_quantity: util::get_i64(item, "products_quantity"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let data = self.get("/api/orders.php?limit=50").await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "orders_id")
                .ok_or_else(|| AdapterError::malformed("oscommerce order missing orders_id"))?;
            let status_value =
                util::get_str(raw, "orders_status").unwrap_or_else(|| "pending".to_string());
            let currency = util::get_str(raw, "currency");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: raw
                    .get("order_total")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("date_purchased").and_then(as_sql_datetime),
                updated_at: raw.get("last_modified").and_then(as_sql_datetime),
                customer_email: util::get_str(raw, "customers_email_address"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        Ok(FetchOrdersPage::done(orders))
    }
}

fn as_sql_datetime(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    util::parse_timestamp(&JsonValue::String(s.replacen(' ', "T", 1) + "Z"))
}
