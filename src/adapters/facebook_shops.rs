//! Facebook Shops channel adapter
//!
//! Graph API with the access token passed as a query parameter. Products
//! live under the commerce catalog, orders under the commerce account.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v18.0";

pub struct FacebookShopsAdapter {
    client: Client,
    base_url: String,
    access_token: String,
    catalog_id: String,
}

impl FacebookShopsAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "facebook_shops")?
            .to_string();
        let catalog_id = if ctx.external_id.is_empty() {
            return Err(AdapterError::configuration(
                "facebook_shops requires a catalog id",
            ));
        } else {
            ctx.external_id.clone()
        };

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token,
            catalog_id,
        })
    }

    async fn get(&self, path: &str, extra: &str) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(format!(
            "{}{}?access_token={}{}",
            self.base_url, path, self.access_token, extra
        )))
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_uppercase().as_str() {
        "CREATED" | "FB_PROCESSING" => Ok(OrderStatus::Pending),
        "IN_PROGRESS" => Ok(OrderStatus::Processing),
        "SHIPPED" => Ok(OrderStatus::Shipped),
        "COMPLETED" => Ok(OrderStatus::Delivered),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "REFUNDED" | "PARTIALLY_REFUNDED" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "facebook_shops".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for FacebookShopsAdapter {
    fn channel(&self) -> &'static str {
        "facebook_shops"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const FIELDS: &str =
            "&fields=id,name,description,price,currency,retailer_id,url,image_url,availability,brand&limit=100";

        let mut items = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let extra = match &after {
                // Graph API cursors are URL-safe base64
                Some(cursor) => format!("{}&after={}", FIELDS, cursor),
                None => FIELDS.to_string(),
            };
            let data = self
                .get(&format!("/{}/products", self.catalog_id), &extra)
                .await?;

            let batch = data
                .get("data")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            // A next page exists only while Graph returns a next link
            after = match util::get_str(&data, "paging.next") {
                Some(_) => util::get_str(&data, "paging.cursors.after"),
                None => None,
            };
            if after.is_none() || batch_len == 0 {
                break;
            }
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "id")
                .ok_or_else(|| AdapterError::malformed("facebook_shops product missing id"))?;
            // The catalog reports "in stock"/"out of stock" rather than a count
            let stock_quantity = util::get_str(item, "availability").map(|a| match a.as_str() {
                "in stock" | "available for order" => 999,
                _ => 0,
            });
            products.push(Product {
                id,
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item.get("price").and_then(util::parse_price),
                currency: util::get_str(item, "currency"),
                sku: util::get_str(item, "retailer_id"),
                url: util::get_str(item, "url"),
                image_url: util::get_str(item, "image_url"),
                stock_quantity,
                brand: util::get_str(item, "brand"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut extra = String::from(
            "&fields=id,order_status,created,last_updated,estimated_payment_details,items&state=CREATED,IN_PROGRESS,COMPLETED&limit=50",
        );
        if let Some(cursor) = since.and_then(|c| c.as_str()) {
            extra.push_str(&format!("&updated_after={}", util::encode_query_value(cursor)));
        }
        let data = self
            .get(&format!("/{}/commerce_orders", self.catalog_id), &extra)
            .await?;

        let items = data
            .get("data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "id")
                .ok_or_else(|| AdapterError::malformed("facebook_shops order missing id"))?;
            let status_value = util::get_str(raw, "order_status.state")
                .unwrap_or_else(|| "CREATED".to_string());

            let currency = util::get_str(raw, "estimated_payment_details.total_amount.currency");
            let currency_defaulted = currency.is_none();

            let line_items: Vec<LineItem> = raw
                .get("items")
                .and_then(|v| v.get("data"))
                .and_then(|v| v.as_array())
                .map(|rows| {
                    rows.iter()
                        .map(|item| LineItem {
                            product_id: util::get_str(item, "product_id"),
                            variant_id: None,
                            sku: util::get_str(item, "retailer_id"),
                            name: util::get_str(item, "product_name"),
                            quantity: util::get_i64(item, "quantity").unwrap_or(1),
                            price: item
                                .get("price_per_unit")
                                .and_then(|p| p.get("amount"))
                                .and_then(util::parse_price),
                        })
                        .collect()
                })
                .unwrap_or_default();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: raw
                    .get("estimated_payment_details")
                    .and_then(|p| p.get("total_amount"))
                    .and_then(|t| t.get("amount"))
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("created").and_then(util::parse_timestamp),
                updated_at: raw.get("last_updated").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        // Watermark on last_updated so the next run only sees changed orders
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
