//! Mercado Libre channel adapter
//!
//! Bearer-token API keyed by the seller id. The items search endpoint only
//! returns ids, so the catalog fetch hydrates each item individually.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, ProductVariant, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.mercadolibre.com";
const PAGE_LIMIT: usize = 50;

pub struct MercadoLibreAdapter {
    client: Client,
    base_url: String,
    access_token: String,
    seller_id: String,
}

impl MercadoLibreAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "mercado_libre")?
            .to_string();
        if ctx.external_id.is_empty() {
            return Err(AdapterError::configuration(
                "mercado_libre requires a seller id",
            ));
        }

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token,
            seller_id: ctx.external_id.clone(),
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).bearer_auth(&self.access_token)).await
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "id")
            .ok_or_else(|| AdapterError::malformed("mercado_libre order missing id"))?;

        let status_value = util::get_str(raw, "status").unwrap_or_else(|| "confirmed".to_string());
        let status = map_status(&status_value)?;

        let currency = util::get_str(raw, "currency_id");
        let currency_defaulted = currency.is_none();

        let line_items = raw
            .get("order_items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| LineItem {
                        product_id: util::get_str(item, "item.id"),
                        variant_id: util::get_str(item, "item.variation_id"),
                        sku: util::get_str(item, "item.seller_custom_field"),
                        name: util::get_str(item, "item.title"),
                        quantity: util::get_i64(item, "quantity").unwrap_or(1),
                        price: item.get("unit_price").and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Order {
            id: id.clone(),
            order_number: Some(id),
            status,
            total: raw
                .get("total_amount")
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            currency: currency.unwrap_or_else(|| "ARS".to_string()),
            currency_defaulted,
            created_at: raw.get("date_created").and_then(util::parse_timestamp),
            updated_at: raw
                .get("last_updated")
                .and_then(util::parse_timestamp)
                .or_else(|| raw.get("date_closed").and_then(util::parse_timestamp)),
            customer_email: util::get_str(raw, "buyer.email"),
            shipping_address: None,
            line_items,
            raw: raw.clone(),
        })
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "confirmed" | "payment_required" | "payment_in_process" => Ok(OrderStatus::Pending),
        "paid" | "partially_paid" => Ok(OrderStatus::Paid),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "invalid" => Ok(OrderStatus::Cancelled),
        "refunded" | "partially_refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "mercado_libre".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for MercadoLibreAdapter {
    fn channel(&self) -> &'static str {
        "mercado_libre"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let id_values = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let search_url = format!(
                "{}/users/{}/items/search?status=active&limit={}&offset={}",
                self.base_url, self.seller_id, PAGE_LIMIT, offset
            );
            let search = self.get(search_url).await?;
            Ok(search
                .get("results")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let ids: Vec<String> = id_values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mut products = Vec::with_capacity(ids.len());
        for item_id in ids {
            let item = self
                .get(format!("{}/items/{}", self.base_url, item_id))
                .await?;

            let variants = item
                .get("variations")
                .and_then(|v| v.as_array())
                .map(|vs| {
                    vs.iter()
                        .map(|v| ProductVariant {
                            id: util::get_str(v, "id").unwrap_or_default(),
                            name: util::get_str(v, "attribute_combinations.0.value_name"),
                            price: v.get("price").and_then(util::parse_price),
                            sku: util::get_str(v, "seller_custom_field"),
                            stock: util::get_i64(v, "available_quantity"),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            products.push(Product {
                id: util::get_str(&item, "id").unwrap_or(item_id),
                name: util::get_str(&item, "title").unwrap_or_default(),
                description: util::get_str(&item, "description"),
                price: item.get("price").and_then(util::parse_price),
                currency: util::get_str(&item, "currency_id"),
                sku: util::get_str(&item, "seller_custom_field"),
                url: util::get_str(&item, "permalink"),
                image_url: util::get_str(&item, "pictures.0.url"),
                stock_quantity: util::get_i64(&item, "available_quantity"),
                categories: util::get_str(&item, "category_id").into_iter().collect(),
                brand: None,
                variants,
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!(
            "{}/orders/search?seller={}&limit={}&sort=date_desc",
            self.base_url, self.seller_id, PAGE_LIMIT
        );
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("&order.date_created.from={}", util::encode_query_value(watermark)));
        }

        let data = self.get(url).await?;
        let results = data
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("mercado_libre orders response missing results"))?;

        let mut orders = Vec::with_capacity(results.len());
        for raw in results {
            orders.push(self.map_order(raw)?);
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.created_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = results.len() >= PAGE_LIMIT;
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
    fn new_requires_token_and_seller_id() {
        assert!(MercadoLibreAdapter::new(&AdapterContext::default()).is_err());
        assert!(MercadoLibreAdapter::new(&AdapterContext {
            access_token: Some("APP_USR-token".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn status_mapping_covers_meli_lifecycle() {
        assert_eq!(map_status("payment_required").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("paid").unwrap(), OrderStatus::Paid);
        assert_eq!(map_status("shipped").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("delivered").unwrap(), OrderStatus::Delivered);
        assert_eq!(map_status("cancelled").unwrap(), OrderStatus::Cancelled);
        assert!(map_status("in_orbit").is_err());
    }

    #[tokio::test]
    async fn fetch_orders_scopes_to_seller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/search"))
            .and(query_param("seller", "112233"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": 2000003508419013u64,
                    "status": "paid",
                    "total_amount": 1535.5,
                    "currency_id": "ARS",
                    "date_created": "2025-06-01T12:00:00.000-04:00",
                    "last_updated": "2025-06-01T13:00:00.000-04:00",
                    "buyer": { "email": "comprador@example.com" },
                    "order_items": [{
                        "item": { "id": "MLA1", "title": "Mate", "seller_custom_field": "MATE-1" },
                        "quantity": 1,
                        "unit_price": 1535.5
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let adapter = MercadoLibreAdapter::new(&AdapterContext {
            external_id: "112233".to_string(),
            access_token: Some("APP_USR-token".to_string()),
            metadata: json!({ "api_base": server.uri() }),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders[0].status, OrderStatus::Paid);
        assert_eq!(page.orders[0].total, "1535.50");
        assert_eq!(page.orders[0].currency, "ARS");
        assert_eq!(page.orders[0].line_items[0].sku.as_deref(), Some("MATE-1"));
    }
}
