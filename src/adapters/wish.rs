//! Wish channel adapter
//!
//! Merchant API v2 takes the access token as a form/query parameter and
//! wraps every record in `{ "data": [{ "Product": {...} }] }` envelopes.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, ProductVariant, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://merchant.wish.com";
const PAGE_LIMIT: u64 = 100;

pub struct WishAdapter {
    client: Client,
    base_url: String,
    access_token: String,
}

impl WishAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "wish")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token,
        })
    }

    async fn get(&self, path: &str, start: u64) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(format!(
            "{}{}?access_token={}&start={}&limit={}",
            self.base_url, path, self.access_token, start, PAGE_LIMIT
        )))
        .await
    }
}

fn map_state(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_uppercase().as_str() {
        "PENDING" | "UNFULFILLED" | "APPROVED" => Ok(OrderStatus::Pending),
        "ACKNOWLEDGED" | "PROCESSING" => Ok(OrderStatus::Processing),
        "SHIPPED" => Ok(OrderStatus::Shipped),
        "DELIVERED" | "COMPLETED" => Ok(OrderStatus::Delivered),
        "CANCELLED" | "CANCELLED_BY_MERCHANT" | "EXPIRED" => Ok(OrderStatus::Cancelled),
        "REFUNDED" | "RETURNED" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "wish".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for WishAdapter {
    fn channel(&self) -> &'static str {
        "wish"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let rows = util::paginate_offset(PAGE_LIMIT as usize, |offset| async move {
            let data = self.get("/api/v2/product/multi-get", offset as u64).await?;
            Ok(data
                .get("data")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            let item = row
                .get("Product")
                .ok_or_else(|| AdapterError::malformed("wish row missing Product envelope"))?;
            let id = util::get_str(item, "id")
                .ok_or_else(|| AdapterError::malformed("wish product missing id"))?;

            // Variations sit in their own envelopes inside the product
            let variants: Vec<ProductVariant> = item
                .get("variants")
                .and_then(|v| v.as_array())
                .map(|vs| {
                    vs.iter()
                        .filter_map(|row| row.get("Variant"))
                        .map(|v| ProductVariant {
                            id: util::get_str(v, "id").unwrap_or_default(),
                            name: util::get_str(v, "size").or_else(|| util::get_str(v, "color")),
                            price: v.get("price").and_then(util::parse_price),
                            sku: util::get_str(v, "sku"),
                            stock: util::get_i64(v, "inventory"),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let stock_quantity = variants
                .iter()
                .filter_map(|v| v.stock)
                .reduce(|a, b| a + b)
                .or_else(|| util::get_i64(item, "total_inventory"));

            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item
                    .get("msrp")
                    .or_else(|| item.get("price"))
                    .and_then(util::parse_price),
                sku: util::get_str(item, "parent_sku"),
                image_url: util::get_str(item, "main_image"),
                stock_quantity,
                variants,
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        // Offset paging through the multi-get endpoint
        let start = since.and_then(|c| c.as_json().as_u64()).unwrap_or(0);
        let data = self.get("/api/v2/order/multi-get", start).await?;

        let rows = data
            .get("data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw = row
                .get("Order")
                .ok_or_else(|| AdapterError::malformed("wish row missing Order envelope"))?;
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("wish order missing order_id"))?;
            let state = util::get_str(raw, "state").unwrap_or_else(|| "PENDING".to_string());

            let quantity = util::get_i64(raw, "quantity").unwrap_or(1);
            let unit_price = util::get_f64(raw, "price").unwrap_or(0.0);
            let shipping = util::get_f64(raw, "shipping").unwrap_or(0.0);

            let line_items = vec![LineItem {
                product_id: util::get_str(raw, "product_id"),
                variant_id: util::get_str(raw, "variant_id"),
                sku: util::get_str(raw, "sku"),
                name: util::get_str(raw, "product_name"),
                quantity,
                price: Some(util::format_2dp(unit_price)),
            }];

            let currency = util::get_str(raw, "currency_code");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_state(&state)?,
                total: util::format_2dp(unit_price * quantity as f64 + shipping),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("order_time").and_then(util::parse_timestamp),
                updated_at: raw.get("last_updated").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        let has_more = rows.len() as u64 >= PAGE_LIMIT;
        let next_cursor =
            has_more.then(|| SyncCursor::from_json(serde_json::json!(start + rows.len() as u64)));

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
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_requires_access_token() {
        assert!(WishAdapter::new(&AdapterContext::default()).is_err());
        assert!(WishAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn state_mapping_covers_merchant_states() {
        assert_eq!(map_state("APPROVED").unwrap(), OrderStatus::Pending);
        assert_eq!(map_state("SHIPPED").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_state("CANCELLED_BY_MERCHANT").unwrap(), OrderStatus::Cancelled);
        assert_eq!(map_state("REFUNDED").unwrap(), OrderStatus::Refunded);
        assert!(map_state("DISPUTED").is_err());
    }

    #[tokio::test]
    async fn orders_are_unwrapped_from_their_envelopes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/order/multi-get"))
            .and(query_param("access_token", "token"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "Order": {
                        "order_id": "w-55",
                        "state": "SHIPPED",
                        "product_id": "p-9",
                        "product_name": "Socks",
                        "sku": "W-SKU",
                        "quantity": 3,
                        "price": 4.50,
                        "shipping": 2.00,
                        "currency_code": "USD",
                        "order_time": "2025-06-01T08:00:00Z",
                        "last_updated": "2025-06-02T08:00:00Z"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let adapter = WishAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({ "api_base": server.uri() }),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders.len(), 1);
        let order = &page.orders[0];
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.total, "15.50");
        assert_eq!(order.line_items[0].quantity, 3);
        assert!(!page.has_more);
    }
}
