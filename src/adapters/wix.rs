//! Wix Stores channel adapter
//!
//! Stores API with the API key as the `Authorization` header. Both catalog
//! and orders are POST query endpoints with offset paging.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, ProductVariant, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://www.wixapis.com";
const PAGE_LIMIT: usize = 50;

pub struct WixAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    site_id: String,
}

impl WixAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "wix")?
            .to_string();
        if ctx.external_id.is_empty() {
            return Err(AdapterError::configuration("wix requires a site id"));
        }

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            site_id: ctx.external_id.clone(),
        })
    }

    async fn query(&self, path: &str, offset: usize) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .post(format!("{}{}", self.base_url, path))
                .header("Authorization", &self.api_key)
                .header("wix-site-id", &self.site_id)
                .json(&json!({
                    "query": { "paging": { "limit": PAGE_LIMIT, "offset": offset } }
                })),
        )
        .await
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "id")
            .ok_or_else(|| AdapterError::malformed("wix order missing id"))?;

        let status = map_status(
            util::get_str(raw, "paymentStatus").as_deref(),
            util::get_str(raw, "fulfillmentStatus").as_deref(),
            util::get_str(raw, "archived").as_deref() == Some("true"),
        )?;

        let currency = util::get_str(raw, "currency");
        let currency_defaulted = currency.is_none();

        let line_items = raw
            .get("lineItems")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| LineItem {
                        product_id: util::get_str(item, "productId"),
                        variant_id: util::get_str(item, "variantId"),
                        sku: util::get_str(item, "sku"),
                        name: util::get_str(item, "name"),
                        quantity: util::get_i64(item, "quantity").unwrap_or(1),
                        price: item.get("price").and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Order {
            id,
            order_number: util::get_str(raw, "number"),
            status,
            total: raw
                .get("totals")
                .and_then(|t| t.get("total"))
                .and_then(util::parse_price)
                .unwrap_or_else(|| "0.00".to_string()),
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            currency_defaulted,
            created_at: raw.get("dateCreated").and_then(util::parse_timestamp),
            updated_at: raw.get("lastUpdated").and_then(util::parse_timestamp),
            customer_email: util::get_str(raw, "buyerInfo.email"),
            shipping_address: None,
            line_items,
            raw: raw.clone(),
        })
    }
}

fn map_status(
    payment: Option<&str>,
    fulfillment: Option<&str>,
    cancelled: bool,
) -> Result<OrderStatus, AdapterError> {
    if cancelled || matches!(payment, Some("CANCELED")) {
        return Ok(OrderStatus::Cancelled);
    }
    match fulfillment {
        Some("FULFILLED") => return Ok(OrderStatus::Shipped),
        Some("PARTIALLY_FULFILLED") => return Ok(OrderStatus::Processing),
        Some("NOT_FULFILLED") | None => {}
        Some(other) => {
            return Err(AdapterError::UnmappedStatus {
                channel: "wix".to_string(),
                value: other.to_string(),
            });
        }
    }
    match payment {
        Some("PAID") | Some("PARTIALLY_REFUNDED") => Ok(OrderStatus::Paid),
        Some("FULLY_REFUNDED") => Ok(OrderStatus::Refunded),
        Some("NOT_PAID") | Some("PENDING") | None => Ok(OrderStatus::Pending),
        Some(other) => Err(AdapterError::UnmappedStatus {
            channel: "wix".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for WixAdapter {
    fn channel(&self) -> &'static str {
        "wix"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self.query("/stores/v1/products/query", offset).await?;
            data.get("products")
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| AdapterError::malformed("wix products response missing array"))
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let variants = item
                .get("variants")
                .and_then(|v| v.as_array())
                .map(|vs| {
                    vs.iter()
                        .map(|v| ProductVariant {
                            id: util::get_str(v, "id").unwrap_or_default(),
                            name: util::get_str(v, "choices.0.description"),
                            price: v.get("price").and_then(util::parse_price),
                            sku: util::get_str(v, "sku"),
                            stock: util::get_i64(v, "stock.quantity"),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            products.push(Product {
                id: util::get_str(item, "id")
                    .ok_or_else(|| AdapterError::malformed("wix product missing id"))?,
                name: util::get_str(item, "name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item
                    .get("price")
                    .and_then(|p| p.get("price"))
                    .and_then(util::parse_price),
                currency: util::get_str(item, "price.currency"),
                sku: util::get_str(item, "sku").filter(|s| !s.is_empty()),
                url: util::get_str(item, "productPageUrl.base"),
                image_url: util::get_str(item, "media.mainMedia.image.url"),
                stock_quantity: util::get_i64(item, "stock.quantity"),
                categories: Vec::new(),
                brand: util::get_str(item, "brand"),
                variants,
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        // The query endpoint pages by offset, carried in the cursor
        let offset = since
            .and_then(|c| c.as_json().as_u64())
            .unwrap_or(0) as usize;

        let data = self.query("/stores/v1/orders/query", offset).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("wix orders response missing array"))?;

        let mut orders = Vec::with_capacity(items.len());
        for raw in items {
            orders.push(self.map_order(raw)?);
        }

        let has_more = items.len() >= PAGE_LIMIT;
        let next_cursor = has_more
            .then(|| SyncCursor::from_json(json!(offset + items.len())));

        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
