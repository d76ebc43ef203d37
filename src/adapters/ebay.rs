//! eBay channel adapter
//!
//! Sell APIs with an OAuth user access token: inventory items for the
//! catalog and the Fulfillment API for orders.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.ebay.com";
const PAGE_LIMIT: usize = 100;

pub struct EbayAdapter {
    client: Client,
    base_url: String,
    access_token: String,
}

impl EbayAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "ebay")?
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

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).bearer_auth(&self.access_token)).await
    }

    fn map_order(&self, raw: &JsonValue) -> Result<Order, AdapterError> {
        let id = util::get_str(raw, "orderId")
            .ok_or_else(|| AdapterError::malformed("ebay order missing orderId"))?;

        let status = map_status(
            util::get_str(raw, "orderFulfillmentStatus").as_deref(),
            util::get_str(raw, "orderPaymentStatus").as_deref(),
            util::get_str(raw, "cancelStatus.cancelState").as_deref(),
        )?;

        let total = raw
            .get("pricingSummary")
            .and_then(|p| p.get("total"))
            .and_then(|t| t.get("value"))
            .and_then(util::parse_price)
            .unwrap_or_else(|| "0.00".to_string());
        let currency = util::get_str(raw, "pricingSummary.total.currency");
        let currency_defaulted = currency.is_none();

        let line_items = raw
            .get("lineItems")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| LineItem {
                        product_id: util::get_str(item, "legacyItemId"),
                        variant_id: util::get_str(item, "legacyVariationId"),
                        sku: util::get_str(item, "sku"),
                        name: util::get_str(item, "title"),
                        quantity: util::get_i64(item, "quantity").unwrap_or(1),
                        price: item
                            .get("lineItemCost")
                            .and_then(|c| c.get("value"))
                            .and_then(util::parse_price),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Order {
            id,
            order_number: util::get_str(raw, "legacyOrderId"),
            status,
            total,
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            currency_defaulted,
            created_at: raw.get("creationDate").and_then(util::parse_timestamp),
            updated_at: raw.get("lastModifiedDate").and_then(util::parse_timestamp),
            customer_email: util::get_str(raw, "buyer.buyerRegistrationAddress.email"),
            shipping_address: None,
            line_items,
            raw: raw.clone(),
        })
    }
}

fn map_status(
    fulfillment: Option<&str>,
    payment: Option<&str>,
    cancel_state: Option<&str>,
) -> Result<OrderStatus, AdapterError> {
    if matches!(cancel_state, Some("CANCELED")) {
        return Ok(OrderStatus::Cancelled);
    }
    match fulfillment {
        Some("FULFILLED") => return Ok(OrderStatus::Shipped),
        Some("IN_PROGRESS") => return Ok(OrderStatus::Processing),
        Some("NOT_STARTED") | None => {}
        Some(other) => {
            return Err(AdapterError::UnmappedStatus {
                channel: "ebay".to_string(),
                value: other.to_string(),
            });
        }
    }
    match payment {
        Some("PAID") | Some("PARTIALLY_REFUNDED") => Ok(OrderStatus::Paid),
        Some("FULLY_REFUNDED") | Some("REFUNDED") => Ok(OrderStatus::Refunded),
        Some("PENDING") | Some("FAILED") | None => Ok(OrderStatus::Pending),
        Some(other) => Err(AdapterError::UnmappedStatus {
            channel: "ebay".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for EbayAdapter {
    fn channel(&self) -> &'static str {
        "ebay"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let url = format!(
                "{}/sell/inventory/v1/inventory_item?limit={}&offset={}",
                self.base_url, PAGE_LIMIT, offset
            );
            let data = self.get(url).await?;
            Ok(data
                .get("inventoryItems")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let sku = util::get_str(item, "sku")
                .ok_or_else(|| AdapterError::malformed("ebay inventory item missing sku"))?;
            products.push(Product {
                id: sku.clone(),
                name: util::get_str(item, "product.title").unwrap_or_default(),
                description: util::get_str(item, "product.description"),
                image_url: util::get_str(item, "product.imageUrls.0"),
                stock_quantity: util::get_i64(item, "availability.shipToLocationAvailability.quantity"),
                brand: util::get_str(item, "product.brand"),
                sku: Some(sku),
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
            "{}/sell/fulfillment/v1/order?limit={}",
            self.base_url, PAGE_LIMIT
        );
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!(
                "&filter=lastmodifieddate:%5B{}..%5D",
                watermark
            ));
        }

        let data = self.get(url).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::malformed("ebay orders response missing array"))?;

        let mut orders = Vec::with_capacity(items.len());
        for item in items {
            orders.push(self.map_order(item)?);
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = data.get("next").is_some_and(|v| !v.is_null());
        Ok(FetchOrdersPage {
            orders,
            next_cursor,
            has_more,
        })
    }
}
