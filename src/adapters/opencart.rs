//! OpenCart channel adapter
//!
//! OpenCart's API needs a session login first: POST the api key and
//! credentials to `route=api/login`, then pass the returned token on every
//! call. The token is cached for the adapter's lifetime.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

pub struct OpenCartAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    username: String,
    session_token: OnceCell<String>,
}

impl OpenCartAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "opencart")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "opencart")?
            .to_string();
        let username = ctx
            .meta_str("api_username")
            .unwrap_or("Default")
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
            username,
            session_token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str, AdapterError> {
        self.session_token
            .get_or_try_init(|| async {
                let data = send_json(
                    self.client
                        .post(format!("{}/index.php?route=api/login", self.base_url))
                        .form(&[
                            ("username", self.username.as_str()),
                            ("key", self.api_key.as_str()),
                        ]),
                )
                .await?;
                util::get_str(&data, "api_token")
                    .or_else(|| util::get_str(&data, "token"))
                    .ok_or_else(|| AdapterError::configuration("opencart login returned no token"))
            })
            .await
            .map(String::as_str)
    }

    async fn get(&self, route: &str) -> Result<JsonValue, AdapterError> {
        let token = self.token().await?;
        let url = format!(
            "{}/index.php?route={}&api_token={}",
            self.base_url, route, token
        );
        send_json(self.client.get(url)).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "pending" | "missing orders" => Ok(OrderStatus::Pending),
        "processing" | "processed" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "complete" => Ok(OrderStatus::Delivered),
        "canceled" | "cancelled" | "canceled reversal" | "denied" | "expired" | "failed"
        | "voided" => Ok(OrderStatus::Cancelled),
        "refunded" | "reversed" | "chargeback" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "opencart".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for OpenCartAdapter {
    fn channel(&self) -> &'static str {
        "opencart"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!("api/product&limit={}&offset={}", PAGE_LIMIT, offset))
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
                .ok_or_else(|| AdapterError::malformed("opencart product missing product_id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item.get("price").and_then(util::parse_price),
                sku: util::get_str(item, "sku").or(util::get_str(item, "model")),
                url: Some(format!(
                    "{}/index.php?route=product/product&product_id={}",
                    self.base_url, id
                )),
                image_url: util::get_str(item, "image"),
                stock_quantity: util::get_i64(item, "quantity"),
                brand: util::get_str(item, "manufacturer"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let data = self.get("api/order").await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("opencart order missing order_id"))?;
            let status_value =
                util::get_str(raw, "status").unwrap_or_else(|| "pending".to_string());
            let currency = util::get_str(raw, "currency_code");
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
                created_at: raw.get("date_added").and_then(as_sql_datetime),
                updated_at: raw.get("date_modified").and_then(as_sql_datetime),
                customer_email: util::get_str(raw, "email"),
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
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_requires_store_url_and_key() {
        assert!(OpenCartAdapter::new(&AdapterContext::default()).is_err());
    }

    #[test]
    fn status_mapping_covers_opencart_statuses() {
        assert_eq!(map_status("Pending").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("Complete").unwrap(), OrderStatus::Delivered);
        assert_eq!(map_status("Chargeback").unwrap(), OrderStatus::Refunded);
        assert_eq!(map_status("Denied").unwrap(), OrderStatus::Cancelled);
        assert!(map_status("Mislaid").is_err());
    }

    #[tokio::test]
    async fn login_token_is_fetched_once_and_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("route", "api/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "api_token": "sess-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .and(query_param("api_token", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orders": [] })))
            .expect(2)
            .mount(&server)
            .await;

        let adapter = OpenCartAdapter::new(&AdapterContext {
            store_url: Some(server.uri()),
            api_key: Some("key".to_string()),
            ..Default::default()
        })
        .unwrap();

        adapter.fetch_orders(None).await.unwrap();
        adapter.fetch_orders(None).await.unwrap();
    }
}
