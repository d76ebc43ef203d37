//! Magento 2 channel adapter
//!
//! Current REST API with a bearer integration token. Unlike the legacy
//! surface, orders carry their own currency code and the search criteria
//! support explicit paging.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const PAGE_LIMIT: usize = 100;

pub struct Magento2Adapter {
    client: Client,
    base_url: String,
    access_token: String,
}

impl Magento2Adapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "magento2")?
            .trim_end_matches('/')
            .to_string();
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "magento2")?
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

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "entity_id")
            .ok_or_else(|| AdapterError::malformed("magento2 order missing entity_id"))?;

        let status_value = util::get_str(raw, "status").unwrap_or_else(|| "pending".to_string());
        let currency = util::get_str(raw, "order_currency_code");
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
                        sku: util::get_str(item, "sku"),
                        name: util::get_str(item, "name"),
                        quantity: util::get_i64(item, "qty_ordered").unwrap_or(1),
                        price: item.get("price").and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Order {
            id,
            order_number: util::get_str(raw, "increment_id"),
            status: map_status(&status_value)?,
            total: raw
                .get("grand_total")
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            currency_defaulted,
            created_at: raw.get("created_at").and_then(as_magento_datetime),
            updated_at: raw.get("updated_at").and_then(as_magento_datetime),
            customer_email: util::get_str(raw, "customer_email"),
            shipping_address: None,
            line_items,
            raw: raw.clone(),
        })
    }
}

fn as_magento_datetime(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    util::parse_timestamp(&JsonValue::String(s.replacen(' ', "T", 1) + "Z"))
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "pending" | "pending_payment" | "payment_review" | "holded" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "complete" => Ok(OrderStatus::Delivered),
        "closed" => Ok(OrderStatus::Refunded),
        "canceled" | "fraud" => Ok(OrderStatus::Cancelled),
        other => Err(AdapterError::UnmappedStatus {
            channel: "magento2".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for Magento2Adapter {
    fn channel(&self) -> &'static str {
        "magento2"
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
                .ok_or_else(|| AdapterError::malformed("magento2 products response missing items"))?;
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
                .ok_or_else(|| AdapterError::malformed("magento2 product missing id"))?;

            let url_key = item
                .get("custom_attributes")
                .and_then(|v| v.as_array())
                .and_then(|attrs| {
                    attrs.iter().find(|attr| {
                        util::get_str(attr, "attribute_code").as_deref() == Some("url_key")
                    })
                })
                .and_then(|attr| util::get_str(attr, "value"));

            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                price: item.get("price").and_then(util::parse_price),
                sku: util::get_str(item, "sku"),
                url: url_key.map(|key| format!("{}/{}.html", self.base_url, key)),
                image_url: util::get_str(item, "media_gallery_entries.0.file")
                    .map(|file| format!("{}/media/catalog/product{}", self.base_url, file)),
                stock_quantity: util::get_i64(item, "extension_attributes.stock_item.qty"),
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
            "{}/rest/V1/orders?searchCriteria[pageSize]={}&searchCriteria[currentPage]=1",
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
            .ok_or_else(|| AdapterError::malformed("magento2 orders response missing items"))?;

        let mut orders = Vec::with_capacity(items.len());
        for raw in items {
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_requires_store_url_and_token() {
        assert!(Magento2Adapter::new(&AdapterContext::default()).is_err());
    }

    #[tokio::test]
    async fn fetch_orders_reads_order_currency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/V1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "entity_id": 3,
                    "increment_id": "000000003",
                    "status": "processing",
                    "grand_total": 159.4,
                    "order_currency_code": "CHF",
                    "customer_email": "kunde@example.ch",
                    "created_at": "2025-05-05 09:00:00",
                    "updated_at": "2025-05-05 10:00:00",
                    "items": [
                        { "product_id": 11, "sku": "24-MB01", "name": "Duffle", "qty_ordered": 1, "price": 159.4 }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let adapter = Magento2Adapter::new(&AdapterContext {
            store_url: Some(server.uri()),
            access_token: Some("integration-token".to_string()),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders[0].currency, "CHF");
        assert!(!page.orders[0].currency_defaulted);
        assert_eq!(page.orders[0].status, OrderStatus::Processing);
        assert_eq!(page.orders[0].total, "159.40");
        assert_eq!(
            page.next_cursor.unwrap().as_str().unwrap(),
            "2025-05-05 10:00:00"
        );
    }
}
