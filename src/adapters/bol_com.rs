//! Bol.com channel adapter
//!
//! Retailer API with a client-credentials token exchanged at login time and
//! cached for the adapter's lifetime. Responses require the versioned
//! retailer media type.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.bol.com";
const DEFAULT_AUTH_URL: &str = "https://login.bol.com/token";
const ACCEPT: &str = "application/vnd.retailer.v9+json";
/// Fixed page size of the retailer offer and order listings
const PAGE_SIZE: usize = 50;

pub struct BolComAdapter {
    client: Client,
    base_url: String,
    auth_url: String,
    client_id: String,
    client_secret: String,
    access_token: OnceCell<String>,
}

impl BolComAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let client_id = ctx
            .require(ctx.meta_str("client_id"), "a client id", "bol_com")?
            .to_string();
        let client_secret = ctx
            .require(ctx.access_token.as_deref(), "a client secret", "bol_com")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            auth_url: ctx
                .meta_str("auth_url")
                .unwrap_or(DEFAULT_AUTH_URL)
                .to_string(),
            client_id,
            client_secret,
            access_token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str, AdapterError> {
        self.access_token
            .get_or_try_init(|| async {
                let data = send_json(
                    self.client
                        .post(&self.auth_url)
                        .basic_auth(&self.client_id, Some(&self.client_secret))
                        .form(&[("grant_type", "client_credentials")]),
                )
                .await?;
                util::get_str(&data, "access_token").ok_or_else(|| {
                    AdapterError::configuration("bol_com token response missing access_token")
                })
            })
            .await
            .map(String::as_str)
    }

    async fn get(&self, path: &str) -> Result<JsonValue, AdapterError> {
        let token = self.token().await?;
        send_json(
            self.client
                .get(format!("{}{}", self.base_url, path))
                .bearer_auth(token)
                .header("Accept", ACCEPT),
        )
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_uppercase().as_str() {
        "OPEN" | "PENDING" => Ok(OrderStatus::Pending),
        "HANDLING" | "HANDLED" => Ok(OrderStatus::Processing),
        "SHIPPED" => Ok(OrderStatus::Shipped),
        "DELIVERED" => Ok(OrderStatus::Delivered),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "RETURNED" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "bol_com".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for BolComAdapter {
    fn channel(&self) -> &'static str {
        "bol_com"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let data = self.get(&format!("/retailer/offers?page={}", page)).await?;
            let batch = data
                .get("offers")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        let mut products = Vec::with_capacity(items.len());
        for offer in &items {
            let id = util::get_str(offer, "offerId")
                .ok_or_else(|| AdapterError::malformed("bol_com offer missing offerId"))?;
            products.push(Product {
                id,
                name: util::get_str(offer, "product.title").unwrap_or_default(),
                price: offer
                    .get("pricing")
                    .and_then(|p| p.get("bundlePrices"))
                    .and_then(|b| b.get(0))
                    .and_then(|b| b.get("unitPrice"))
                    .and_then(util::parse_price),
                currency: Some("EUR".to_string()),
                sku: util::get_str(offer, "reference")
                    .filter(|r| !r.is_empty())
                    .or_else(|| util::get_str(offer, "ean")),
                stock_quantity: util::get_i64(offer, "stock.amount"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        // Page number travels in the cursor, the API caps at 50 per page
        let page = since.and_then(|c| c.as_json().as_u64()).unwrap_or(1);
        let data = self
            .get(&format!("/retailer/orders?status=ALL&page={}", page))
            .await?;

        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "orderId")
                .ok_or_else(|| AdapterError::malformed("bol_com order missing orderId"))?;

            let order_items = raw
                .get("orderItems")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let status_value = order_items
                .first()
                .and_then(|item| util::get_str(item, "fulfilmentStatus"))
                .or_else(|| util::get_str(raw, "status"))
                .unwrap_or_else(|| "OPEN".to_string());

            let line_items: Vec<LineItem> = order_items
                .iter()
                .map(|item| LineItem {
                    product_id: util::get_str(item, "product.ean"),
                    variant_id: None,
                    sku: util::get_str(item, "offer.reference"),
                    name: util::get_str(item, "product.title"),
                    quantity: util::get_i64(item, "quantity").unwrap_or(1),
                    price: item.get("unitPrice").and_then(util::parse_price),
                })
                .collect();

            let total = line_items
                .iter()
                .filter_map(|item| {
                    item.price
                        .as_deref()
                        .and_then(|p| p.parse::<f64>().ok())
                        .map(|p| p * item.quantity as f64)
                })
                .sum::<f64>();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: util::format_2dp(total),
                currency: "EUR".to_string(),
                currency_defaulted: false,
                created_at: raw.get("orderPlacedDateTime").and_then(util::parse_timestamp),
                updated_at: raw.get("orderPlacedDateTime").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        let has_more = items.len() >= 50;
        let next_cursor = has_more.then(|| SyncCursor::from_json(serde_json::json!(page + 1)));

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
    fn new_requires_client_credentials() {
        assert!(BolComAdapter::new(&AdapterContext::default()).is_err());
        assert!(BolComAdapter::new(&AdapterContext {
            access_token: Some("secret".to_string()),
            metadata: json!({ "client_id": "id" }),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn status_mapping_covers_fulfilment_states() {
        assert_eq!(map_status("OPEN").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("HANDLING").unwrap(), OrderStatus::Processing);
        assert_eq!(map_status("SHIPPED").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("RETURNED").unwrap(), OrderStatus::Refunded);
        assert!(map_status("FLOATING").is_err());
    }

    #[tokio::test]
    async fn token_exchange_happens_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "bol-token" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/retailer/orders"))
            .and(header("Authorization", "Bearer bol-token"))
            .and(header("Accept", ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orders": [] })))
            .expect(2)
            .mount(&server)
            .await;

        let adapter = BolComAdapter::new(&AdapterContext {
            access_token: Some("secret".to_string()),
            metadata: json!({
                "client_id": "id",
                "api_base": server.uri(),
                "auth_url": format!("{}/token", server.uri())
            }),
            ..Default::default()
        })
        .unwrap();

        adapter.fetch_orders(None).await.unwrap();
        adapter.fetch_orders(None).await.unwrap();
    }
}
