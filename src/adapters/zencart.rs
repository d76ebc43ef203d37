//! Zen Cart channel adapter
//!
//! Same API-module convention as the other osCommerce descendants: basic
//! auth plus an `X-API-Key` header against `products.php`/`orders.php`.
//! Zen Cart reports order status as a numeric id from its status table.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

pub struct ZenCartAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    username: String,
    password: String,
}

impl ZenCartAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "zencart")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "zencart")?
            .to_string();
        let username = ctx
            .require(ctx.meta_str("api_username"), "an api username", "zencart")?
            .to_string();
        let password = ctx
            .require(ctx.access_token.as_deref(), "an api password", "zencart")?
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

/// Zen Cart ships with states 1 (pending), 2 (processing), 3 (delivered)
/// and 4 (update); refund/cancel modules extend the table upward.
fn map_status_id(id: i64) -> Option<OrderStatus> {
    match id {
        1 => Some(OrderStatus::Pending),
        2 => Some(OrderStatus::Processing),
        3 => Some(OrderStatus::Delivered),
        4 => Some(OrderStatus::Shipped),
        5 => Some(OrderStatus::Cancelled),
        6 => Some(OrderStatus::Refunded),
        _ => None,
    }
}

fn map_status(raw: &JsonValue) -> Result<OrderStatus, AdapterError> {
    if let Some(id) = util::get_i64(raw, "orders_status") {
        return map_status_id(id).ok_or_else(|| AdapterError::UnmappedStatus {
            channel: "zencart".to_string(),
            value: id.to_string(),
        });
    }
    match util::get_str(raw, "orders_status_name")
        .unwrap_or_else(|| "pending".to_string())
        .to_lowercase()
        .as_str()
    {
        "pending" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "zencart".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for ZenCartAdapter {
    fn channel(&self) -> &'static str {
        "zencart"
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
                .ok_or_else(|| AdapterError::malformed("zencart product missing products_id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "products_name").unwrap_or_default(),
                description: util::get_str(item, "products_description"),
                price: item.get("products_price").and_then(util::parse_price),
                sku: util::get_str(item, "products_model"),
                url: Some(format!(
                    "{}/index.php?main_page=product_info&products_id={}",
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
                .ok_or_else(|| AdapterError::malformed("zencart order missing orders_id"))?;
            let currency = util::get_str(raw, "currency");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(raw)?,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_requires_full_credential_set() {
        assert!(ZenCartAdapter::new(&AdapterContext::default()).is_err());
        assert!(ZenCartAdapter::new(&AdapterContext {
            store_url: Some("https://shop.example.com".to_string()),
            api_key: Some("key".to_string()),
            access_token: Some("password".to_string()),
            metadata: json!({ "api_username": "api" }),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn numeric_status_ids_map_to_engine_statuses() {
        assert_eq!(map_status(&json!({ "orders_status": 1 })).unwrap(), OrderStatus::Pending);
        assert_eq!(map_status(&json!({ "orders_status": 2 })).unwrap(), OrderStatus::Processing);
        assert_eq!(map_status(&json!({ "orders_status": 3 })).unwrap(), OrderStatus::Delivered);
        assert!(map_status(&json!({ "orders_status": 42 })).is_err());
    }

    #[test]
    fn status_names_map_when_id_is_absent() {
        assert_eq!(
            map_status(&json!({ "orders_status_name": "Shipped" })).unwrap(),
            OrderStatus::Shipped
        );
        assert!(map_status(&json!({ "orders_status_name": "Misplaced" })).is_err());
    }
}
