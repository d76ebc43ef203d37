//! Groupon Goods channel adapter
//!
//! Partner API with a bearer supplier key scoped to a merchant id.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://partner-api.groupon.com";

pub struct GrouponAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    merchant_id: String,
}

impl GrouponAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "groupon")?
            .to_string();
        let merchant_id = if !ctx.external_id.is_empty() {
            ctx.external_id.clone()
        } else {
            ctx.require(ctx.meta_str("merchant_id"), "a merchant id", "groupon")?
                .to_string()
        };

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            merchant_id,
        })
    }

    async fn get(&self, path: &str) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .get(format!("{}{}", self.base_url, path))
                .bearer_auth(&self.api_key),
        )
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_lowercase().as_str() {
        "open" | "pending" | "exported" => Ok(OrderStatus::Pending),
        "processing" | "in_progress" => Ok(OrderStatus::Processing),
        "shipped" | "in_transit" => Ok(OrderStatus::Shipped),
        "delivered" | "closed" => Ok(OrderStatus::Delivered),
        "cancelled" | "canceled" | "failed" => Ok(OrderStatus::Cancelled),
        "refunded" | "returned" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "groupon".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for GrouponAdapter {
    fn channel(&self) -> &'static str {
        "groupon"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!(
                    "/deals.json?merchant_id={}&limit={}&offset={}",
                    self.merchant_id, PAGE_LIMIT, offset
                ))
                .await?;
            Ok(data
                .get("deals")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for deal in &items {
            let id = util::get_str(deal, "id")
                .or_else(|| util::get_str(deal, "uuid"))
                .ok_or_else(|| AdapterError::malformed("groupon deal missing id"))?;

            let price = deal
                .get("options")
                .and_then(|v| v.get(0))
                .and_then(|o| o.get("price"))
                .or_else(|| deal.get("price"));

            products.push(Product {
                id,
                name: util::get_str(deal, "title")
                    .or_else(|| util::get_str(deal, "shortAnnouncementTitle"))
                    .unwrap_or_default(),
                description: util::get_str(deal, "pitchHtml"),
                price: price.and_then(util::parse_price),
                currency: price.and_then(util::price_currency),
                sku: util::get_str(deal, "options.0.sku"),
                url: util::get_str(deal, "dealUrl"),
                image_url: util::get_str(deal, "largeImageUrl"),
                stock_quantity: util::get_i64(deal, "options.0.remainingQuantity"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut path = format!("/orders.json?merchant_id={}&limit=100", self.merchant_id);
        if let Some(cursor) = since.and_then(|c| c.as_str()) {
            path.push_str(&format!("&updated_after={}", util::encode_query_value(cursor)));
        }
        let data = self.get(&path).await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "id")
                .or_else(|| util::get_str(raw, "order_id"))
                .ok_or_else(|| AdapterError::malformed("groupon order missing id"))?;
            let status_value =
                util::get_str(raw, "status").unwrap_or_else(|| "open".to_string());

            let total = raw.get("amount").or_else(|| raw.get("total"));
            let currency = total.and_then(util::price_currency);
            let currency_defaulted = currency.is_none();

            let line_items: Vec<LineItem> = raw
                .get("line_items")
                .and_then(|v| v.as_array())
                .map(|rows| {
                    rows.iter()
                        .map(|item| LineItem {
                            product_id: util::get_str(item, "deal_id"),
                            variant_id: util::get_str(item, "option_id"),
                            sku: util::get_str(item, "sku"),
                            name: util::get_str(item, "name"),
                            quantity: util::get_i64(item, "quantity").unwrap_or(1),
                            price: item.get("unit_price").and_then(util::parse_price),
                        })
                        .collect()
                })
                .unwrap_or_default();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: total
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("date_ordered").and_then(util::parse_timestamp),
                updated_at: raw.get("date_updated").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "customer.email"),
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at.or(o.created_at))
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_requires_key_and_merchant_id() {
        assert!(GrouponAdapter::new(&AdapterContext::default()).is_err());
        assert!(GrouponAdapter::new(&AdapterContext {
            api_key: Some("key".to_string()),
            metadata: json!({ "merchant_id": "m-1" }),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn status_mapping_covers_order_states() {
        assert_eq!(map_status("open").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("exported").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("in_transit").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("returned").unwrap(), OrderStatus::Refunded);
        assert!(map_status("arbitrated").is_err());
    }

    #[tokio::test]
    async fn orders_are_scoped_to_the_merchant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders.json"))
            .and(header("Authorization", "Bearer supplier-key"))
            .and(query_param("merchant_id", "m-77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [{
                    "id": "g-100",
                    "status": "shipped",
                    "amount": { "amount": "39.99", "currency_code": "usd" },
                    "date_ordered": "2025-04-01T09:00:00Z",
                    "date_updated": "2025-04-02T10:00:00Z",
                    "customer": { "email": "buyer@example.com" },
                    "line_items": [
                        { "deal_id": "d-5", "sku": "G-SKU", "quantity": 2, "unit_price": "19.99" }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let adapter = GrouponAdapter::new(&AdapterContext {
            external_id: "m-77".to_string(),
            api_key: Some("supplier-key".to_string()),
            metadata: json!({ "api_base": server.uri() }),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders.len(), 1);
        let order = &page.orders[0];
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.total, "39.99");
        assert_eq!(order.currency, "USD");
        assert!(!order.currency_defaulted);
        assert_eq!(order.line_items[0].quantity, 2);
        assert_eq!(
            page.next_cursor.as_ref().and_then(|c| c.as_str()),
            Some("2025-04-02T10:00:00+00:00")
        );
    }
}
