//! Shopify channel adapter
//!
//! Talks to the Shopify Admin REST API using the connection's OAuth access
//! token. Orders sync incrementally on an `updated_at_min` watermark cursor;
//! catalog listings walk the `Link: rel="next"` header until exhausted.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use url::Url;

use super::util::{self, send_json, send_json_with_next_link};
use super::{
    AdapterContext, AdapterError, Address, ChannelAdapter, FetchOrdersPage, LineItem, Order,
    OrderStatus, Product, ProductVariant, SyncCursor,
};

const API_VERSION: &str = "2024-01";
const PAGE_LIMIT: usize = 250;
const DEFAULT_CURRENCY: &str = "USD";

pub struct ShopifyAdapter {
    client: Client,
    base_url: String,
    access_token: String,
}

impl ShopifyAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "shopify")?
            .to_string();

        let base_url = match &ctx.store_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if !ctx.external_id.is_empty() => format!("https://{}", ctx.external_id),
            None => {
                return Err(AdapterError::configuration(
                    "shopify requires a store url or shop domain",
                ));
            }
        };

        Ok(Self {
            client: util::http_client()?,
            base_url,
            access_token,
        })
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/admin/api/{}/{}", self.base_url, API_VERSION, resource)
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .get(url)
                .header("X-Shopify-Access-Token", &self.access_token)
                .header("Content-Type", "application/json"),
        )
        .await
    }

    async fn get_with_link(&self, url: String) -> Result<(JsonValue, Option<String>), AdapterError> {
        send_json_with_next_link(
            self.client
                .get(url)
                .header("X-Shopify-Access-Token", &self.access_token)
                .header("Content-Type", "application/json"),
        )
        .await
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "id")
            .ok_or_else(|| AdapterError::malformed("shopify order missing id"))?;

        let status = map_status(
            util::get_str(raw, "financial_status").as_deref(),
            util::get_str(raw, "fulfillment_status").as_deref(),
            raw.get("cancelled_at").is_some_and(|v| !v.is_null()),
        )?;

        let total = raw
            .get("total_price")
            .and_then(util::parse_price)
            .unwrap_or_else(|| "0.00".to_string());

        let (currency, currency_defaulted) = match util::get_str(raw, "currency") {
            Some(code) => (code.to_uppercase(), false),
            None => (DEFAULT_CURRENCY.to_string(), true),
        };

        let line_items = raw
            .get("line_items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| LineItem {
                        product_id: util::get_str(item, "product_id"),
                        variant_id: util::get_str(item, "variant_id"),
                        sku: util::get_str(item, "sku"),
                        name: util::get_str(item, "title"),
                        quantity: util::get_i64(item, "quantity").unwrap_or(1),
                        price: item.get("price").and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let shipping_address = raw.get("shipping_address").filter(|v| !v.is_null()).map(|addr| Address {
            name: util::get_str(addr, "name"),
            line1: util::get_str(addr, "address1"),
            line2: util::get_str(addr, "address2"),
            city: util::get_str(addr, "city"),
            state: util::get_str(addr, "province"),
            postal_code: util::get_str(addr, "zip"),
            country: util::get_str(addr, "country_code"),
        });

        Ok(Order {
            id,
            order_number: util::get_str(raw, "order_number").or_else(|| util::get_str(raw, "name")),
            status,
            total,
            currency,
            currency_defaulted,
            created_at: raw.get("created_at").and_then(util::parse_timestamp),
            updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
            customer_email: util::get_str(raw, "email")
                .or_else(|| util::get_str(raw, "contact_email")),
            shipping_address,
            line_items,
            raw: raw.clone(),
        })
    }
}

/// Map Shopify's financial/fulfillment status pair into the engine vocabulary
fn map_status(
    financial: Option<&str>,
    fulfillment: Option<&str>,
    cancelled: bool,
) -> Result<OrderStatus, AdapterError> {
    if cancelled {
        return Ok(OrderStatus::Cancelled);
    }
    match fulfillment {
        Some("fulfilled") => return Ok(OrderStatus::Shipped),
        Some("partial") => return Ok(OrderStatus::Processing),
        Some("restocked") => return Ok(OrderStatus::Refunded),
        Some(other) if other != "null" && !other.is_empty() => {
            return Err(AdapterError::UnmappedStatus {
                channel: "shopify".to_string(),
                value: other.to_string(),
            });
        }
        _ => {}
    }
    match financial {
        None | Some("pending") | Some("authorized") => Ok(OrderStatus::Pending),
        Some("paid") | Some("partially_paid") => Ok(OrderStatus::Paid),
        Some("refunded") | Some("partially_refunded") => Ok(OrderStatus::Refunded),
        Some("voided") => Ok(OrderStatus::Cancelled),
        Some(other) => Err(AdapterError::UnmappedStatus {
            channel: "shopify".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for ShopifyAdapter {
    fn channel(&self) -> &'static str {
        "shopify"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut url = Some(format!(
            "{}?limit={}",
            self.endpoint("products.json"),
            PAGE_LIMIT
        ));

        while let Some(page_url) = url.take() {
            let (data, next) = self.get_with_link(page_url).await?;
            let page = data
                .get("products")
                .and_then(|v| v.as_array())
                .ok_or_else(|| AdapterError::malformed("shopify products response missing array"))?;
            items.extend(page.iter().cloned());
            url = next;
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let variants = item
                .get("variants")
                .and_then(|v| v.as_array())
                .map(|vs| {
                    vs.iter()
                        .map(|v| ProductVariant {
                            id: util::get_str(v, "id").unwrap_or_default(),
                            name: util::get_str(v, "title"),
                            price: v.get("price").and_then(util::parse_price),
                            sku: util::get_str(v, "sku"),
                            stock: util::get_i64(v, "inventory_quantity"),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            products.push(Product {
                id: util::get_str(item, "id")
                    .ok_or_else(|| AdapterError::malformed("shopify product missing id"))?,
                name: util::get_str(item, "title").unwrap_or_default(),
                description: util::get_str(item, "body_html"),
                price: variants.first().and_then(|v| v.price.clone()),
                currency: None,
                sku: variants.first().and_then(|v| v.sku.clone()),
                url: util::get_str(item, "handle")
                    .map(|handle| format!("{}/products/{}", self.base_url, handle)),
                image_url: util::get_str(item, "image.src"),
                stock_quantity: variants.iter().filter_map(|v| v.stock).reduce(|a, b| a + b),
                categories: util::get_str(item, "product_type")
                    .into_iter()
                    .filter(|t| !t.is_empty())
                    .collect(),
                brand: util::get_str(item, "vendor"),
                variants,
            });
        }

        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = Url::parse(&self.endpoint("orders.json"))
            .map_err(|err| AdapterError::configuration(format!("invalid store url: {}", err)))?;
        url.query_pairs_mut()
            .append_pair("status", "any")
            .append_pair("limit", &PAGE_LIMIT.to_string());
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            // Encoded, or the watermark's '+' decodes server-side as a space
            url.query_pairs_mut().append_pair("updated_at_min", watermark);
        }

        let data = self.get(url.into()).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("shopify orders response missing array"))?;

        let mut orders = Vec::with_capacity(items.len());
        for item in items {
            orders.push(self.map_order(item)?);
        }

        // Advance the watermark to the newest updated_at seen
        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = items.len() >= PAGE_LIMIT;
        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
