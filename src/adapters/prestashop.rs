//! PrestaShop channel adapter
//!
//! Webservice API under `{store}/api` with the webservice key as a basic
//! auth username and an empty password. Requests ask for JSON output and a
//! display list instead of the default XML link view. Order state ids
//! follow the stock PrestaShop state table.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const PAGE_LIMIT: usize = 100;
const DEFAULT_CURRENCY: &str = "EUR";

pub struct PrestaShopAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PrestaShopAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "prestashop")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "a webservice key", "prestashop")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).basic_auth(&self.api_key, Some(""))).await
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "id")
            .ok_or_else(|| AdapterError::malformed("prestashop order missing id"))?;

        let state = util::get_i64(raw, "current_state").unwrap_or(0);
        let status = map_state(state)?;

        Ok(Order {
            id: id.clone(),
            order_number: util::get_str(raw, "reference").or(Some(id)),
            status,
            total: raw
                .get("total_paid")
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            // The order row carries a currency id, not a code
            currency: DEFAULT_CURRENCY.to_string(),
            currency_defaulted: true,
            created_at: raw.get("date_add").and_then(as_sql_datetime),
            updated_at: raw.get("date_upd").and_then(as_sql_datetime),
            customer_email: None,
            shipping_address: None,
            line_items: Vec::new(),
            raw: raw.clone(),
        })
    }
}

/// PrestaShop emits `YYYY-MM-DD HH:MM:SS` in the shop timezone
fn as_sql_datetime(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    util::parse_timestamp(&JsonValue::String(s.replacen(' ', "T", 1) + "Z"))
}

fn map_state(state: i64) -> Result<OrderStatus, AdapterError> {
    match state {
        1 | 10 | 13 => Ok(OrderStatus::Pending),
        2 | 11 => Ok(OrderStatus::Paid),
        3 | 9 => Ok(OrderStatus::Processing),
        4 => Ok(OrderStatus::Shipped),
        5 => Ok(OrderStatus::Delivered),
        6 | 8 => Ok(OrderStatus::Cancelled),
        7 => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "prestashop".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for PrestaShopAdapter {
    fn channel(&self) -> &'static str {
        "prestashop"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            // The webservice limit filter takes an "offset,count" pair
            let url = format!(
                "{}/api/products?output_format=JSON&display=[id,name,description,price,reference,quantity,manufacturer_name,id_default_image]&limit={},{}",
                self.base_url, offset, PAGE_LIMIT
            );
            let data = self.get(url).await?;
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
                .ok_or_else(|| AdapterError::malformed("prestashop product missing id"))?;
            products.push(Product {
                id: id.clone(),
                // Multilang fields arrive as either a plain string or a
                // language-keyed list
                name: util::get_str(item, "name")
                    .or_else(|| util::get_str(item, "name.0.value"))
                    .unwrap_or_default(),
                description: util::get_str(item, "description")
                    .or_else(|| util::get_str(item, "description.0.value")),
                price: item.get("price").and_then(util::parse_price),
                currency: Some(DEFAULT_CURRENCY.to_string()),
                sku: util::get_str(item, "reference").filter(|r| !r.is_empty()),
                url: Some(format!("{}/index.php?id_product={}", self.base_url, id)),
                image_url: util::get_str(item, "id_default_image").map(|img| {
                    format!("{}/api/images/products/{}/{}", self.base_url, id, img)
                }),
                stock_quantity: util::get_i64(item, "quantity"),
                brand: util::get_str(item, "manufacturer_name"),
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
            "{}/api/orders?output_format=JSON&display=[id,reference,current_state,total_paid,date_add,date_upd]&sort=[date_upd_ASC]&limit={}",
            self.base_url, PAGE_LIMIT
        );
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("&filter[date_upd]=[{},]&date=1", util::encode_query_value(watermark)));
        }

        let data = self.get(url).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            orders.push(self.map_order(raw)?);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_requires_store_url_and_key() {
        assert!(PrestaShopAdapter::new(&AdapterContext::default()).is_err());
        assert!(PrestaShopAdapter::new(&AdapterContext {
            store_url: Some("https://shop.example.fr".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn state_table_maps_stock_states() {
        assert_eq!(map_state(1).unwrap(), OrderStatus::Pending);
        assert_eq!(map_state(2).unwrap(), OrderStatus::Paid);
        assert_eq!(map_state(3).unwrap(), OrderStatus::Processing);
        assert_eq!(map_state(4).unwrap(), OrderStatus::Shipped);
        assert_eq!(map_state(5).unwrap(), OrderStatus::Delivered);
        assert_eq!(map_state(6).unwrap(), OrderStatus::Cancelled);
        assert_eq!(map_state(7).unwrap(), OrderStatus::Refunded);
        assert!(map_state(99).is_err());
    }

    #[tokio::test]
    async fn fetch_orders_authenticates_with_key_as_username() {
        let server = MockServer::start().await;
        // basic auth for PSKEY:
        Mock::given(method("GET"))
            .and(path("/api/orders"))
            .and(header("Authorization", "Basic UFNLRVk6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [{
                    "id": 9,
                    "reference": "XKBKNABJK",
                    "current_state": "2",
                    "total_paid": "71.51",
                    "date_add": "2025-03-10 14:20:00",
                    "date_upd": "2025-03-10 15:00:00"
                }]
            })))
            .mount(&server)
            .await;

        let adapter = PrestaShopAdapter::new(&AdapterContext {
            store_url: Some(server.uri()),
            api_key: Some("PSKEY".to_string()),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders[0].status, OrderStatus::Paid);
        assert_eq!(page.orders[0].order_number.as_deref(), Some("XKBKNABJK"));
        assert!(page.orders[0].currency_defaulted);
        assert_eq!(
            page.next_cursor.unwrap().as_str().unwrap(),
            "2025-03-10 15:00:00"
        );
    }
}
