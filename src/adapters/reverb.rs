//! Reverb channel adapter
//!
//! Marketplace API with a personal access token and the pinned
//! `Accept-Version: 3.0` header. Listings are single items without
//! variants.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.reverb.com";
const PAGE_LIMIT: usize = 50;

pub struct ReverbAdapter {
    client: Client,
    base_url: String,
    token: String,
}

impl ReverbAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let token = ctx
            .api_key
            .as_deref()
            .or(ctx.access_token.as_deref())
            .ok_or_else(|| AdapterError::configuration("reverb requires an access token"))?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            token,
        })
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(
            self.client
                .get(url)
                .bearer_auth(&self.token)
                .header("Accept-Version", "3.0"),
        )
        .await
    }
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "unpaid" | "payment_pending" | "pending_review" => Ok(OrderStatus::Pending),
        "paid" | "blocked" => Ok(OrderStatus::Paid),
        "shipped" | "in_transit" => Ok(OrderStatus::Shipped),
        "picked_up" | "received" => Ok(OrderStatus::Delivered),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "refunded" | "partially_refunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "reverb".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for ReverbAdapter {
    fn channel(&self) -> &'static str {
        "reverb"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/api/my/listings?per_page={}&page={}",
                self.base_url, PAGE_LIMIT, page
            );
            let data = self.get(url).await?;
            let batch = data
                .get("listings")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
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
                .ok_or_else(|| AdapterError::malformed("reverb listing missing id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "title").unwrap_or_default(),
                description: util::get_str(item, "description"),
                price: item
                    .get("price")
                    .and_then(|p| p.get("amount"))
                    .and_then(util::parse_price),
                currency: util::get_str(item, "price.currency"),
                sku: util::get_str(item, "sku"),
                url: util::get_str(item, "_links.self.href"),
                image_url: util::get_str(item, "photos.0._links.large_crop.href"),
                stock_quantity: util::get_i64(item, "inventory"),
                categories: item
                    .get("categories")
                    .and_then(|v| v.as_array())
                    .map(|cats| {
                        cats.iter()
                            .filter_map(|c| util::get_str(c, "full_name"))
                            .collect()
                    })
                    .unwrap_or_default(),
                brand: util::get_str(item, "make"),
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut url = format!(
            "{}/api/my/orders/selling/all?per_page={}&page=1",
            self.base_url, PAGE_LIMIT
        );
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            url.push_str(&format!("&updated_start_date={}", util::encode_query_value(watermark)));
        }

        let data = self.get(url).await?;
        let items = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_number")
                .or_else(|| util::get_str(raw, "uuid"))
                .ok_or_else(|| AdapterError::malformed("reverb order missing order_number"))?;

            let status_value = util::get_str(raw, "status").unwrap_or_else(|| "unpaid".to_string());
            let currency = util::get_str(raw, "total.currency");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: raw
                    .get("total")
                    .and_then(|t| t.get("amount"))
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("created_at").and_then(util::parse_timestamp),
                updated_at: raw.get("updated_at").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "buyer.email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at)
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = data
            .get("_links")
            .and_then(|l| l.get("next"))
            .is_some_and(|v| !v.is_null());

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

    #[test]
    fn new_accepts_api_key_or_access_token() {
        assert!(ReverbAdapter::new(&AdapterContext::default()).is_err());
        assert!(ReverbAdapter::new(&AdapterContext {
            api_key: Some("token".to_string()),
            ..Default::default()
        })
        .is_ok());
        assert!(ReverbAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn status_mapping_covers_reverb_lifecycle() {
        assert_eq!(map_status("unpaid").unwrap(), OrderStatus::Pending);
        assert_eq!(map_status("paid").unwrap(), OrderStatus::Paid);
        assert_eq!(map_status("shipped").unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status("picked_up").unwrap(), OrderStatus::Delivered);
        assert_eq!(map_status("refunded").unwrap(), OrderStatus::Refunded);
        assert!(map_status("pawned").is_err());
    }
}
