//! Flipkart Marketplace adapter
//!
//! Seller APIs with an OAuth bearer token plus the application id header.
//! All amounts are INR.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, LineItem, Order, OrderStatus,
    Product, SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.flipkart.net";

pub struct FlipkartAdapter {
    client: Client,
    base_url: String,
    access_token: String,
    app_id: Option<String>,
}

impl FlipkartAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "flipkart")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token,
            app_id: ctx.meta_str("app_id").map(str::to_string),
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        let mut request = self.client.get(url).bearer_auth(&self.access_token);
        if let Some(app_id) = &self.app_id {
            request = request.header("FK-App-Id", app_id);
        }
        send_json(request).await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "APPROVED" | "PENDING" => Ok(OrderStatus::Pending),
        "PACKING_IN_PROGRESS" | "PACKED" | "READY_TO_DISPATCH" | "FORM_FAILED" => {
            Ok(OrderStatus::Processing)
        }
        "SHIPPED" | "PICKUP_COMPLETE" => Ok(OrderStatus::Shipped),
        "DELIVERED" => Ok(OrderStatus::Delivered),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "RETURNED" | "RETURN_REQUESTED" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "flipkart".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for FlipkartAdapter {
    fn channel(&self) -> &'static str {
        "flipkart"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut url = Some(format!("{}/sellers/listings/v3", self.base_url));

        while let Some(page_url) = url.take() {
            let data = self.get(page_url).await?;
            let batch = data
                .get("listings")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            items.extend(batch);

            // Listings chain through nextPageUrl, absolute or relative
            url = util::get_str(&data, "nextPageUrl").map(|next| {
                if next.starts_with("http") {
                    next
                } else {
                    format!("{}{}", self.base_url, next)
                }
            });
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "listing_id")
                .ok_or_else(|| AdapterError::malformed("flipkart listing missing listing_id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "product_name").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item.get("mrp").and_then(util::parse_price),
                currency: Some("INR".to_string()),
                sku: util::get_str(item, "sku_id"),
                url: util::get_str(item, "product_url"),
                image_url: util::get_str(item, "image_url"),
                stock_quantity: util::get_i64(item, "available_quantity"),
                categories: util::get_str(item, "category").into_iter().collect(),
                brand: util::get_str(item, "brand"),
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!("{}/sellers/v3/shipments", self.base_url);
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("?modifiedAfter={}", util::encode_query_value(watermark)));
        }

        let data = self.get(url).await?;
        let shipments = data
            .get("shipments")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(shipments.len());
        for raw in &shipments {
            let id = util::get_str(raw, "orderId")
                .or_else(|| util::get_str(raw, "shipmentId"))
                .ok_or_else(|| AdapterError::malformed("flipkart shipment missing orderId"))?;

            let status_value =
                util::get_str(raw, "status").unwrap_or_else(|| "APPROVED".to_string());

            let line_items = raw
                .get("orderItems")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|item| LineItem {
                            product_id: util::get_str(item, "listingId"),
                            variant_id: None,
                            sku: util::get_str(item, "sku"),
                            name: util::get_str(item, "title"),
                            quantity: util::get_i64(item, "quantity").unwrap_or(1),
                            price: item
                                .get("priceComponents")
                                .and_then(|p| p.get("sellingPrice"))
                                .and_then(util::parse_price),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

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
                currency: "INR".to_string(),
                currency_defaulted: false,
                created_at: raw.get("orderDate").and_then(util::parse_timestamp),
                updated_at: raw.get("updatedAt").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items,
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
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

    #[test]
    fn new_requires_access_token() {
        assert!(FlipkartAdapter::new(&AdapterContext::default()).is_err());
        assert!(FlipkartAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn status_mapping_covers_shipment_states() {
        assert_eq!(map_status("APPROVED").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("PACKED").unwrap(), OrderStatus::Processing);
        assert_eq!(map_status("SHIPPED").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("DELIVERED").unwrap(), OrderStatus::Delivered);
        assert_eq!(map_status("RETURNED").unwrap(), OrderStatus::Refunded);
        assert!(map_status("EVAPORATED").is_err());
    }
}
