//! Shift4Shop (3dcart) channel adapter
//!
//! v1 REST API with a bearer private key. Orders carry a numeric
//! `OrderStatusID` from the fixed platform status table.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

pub struct ThreeDCartAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ThreeDCartAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "threedcart")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "threedcart")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url,
            api_key,
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

/// Platform status table: 1 New, 2 Processing, 3 Partial, 4 Shipped,
/// 5 Cancelled, 6 Not Completed, 7 Unpaid, 8 Recurring, 9 Review, 10 Custom
fn map_status_id(id: i64) -> Result<OrderStatus, AdapterError> {
    match id {
        1 | 6 | 7 | 9 => Ok(OrderStatus::Pending),
        2 | 3 | 8 => Ok(OrderStatus::Processing),
        4 => Ok(OrderStatus::Shipped),
        5 => Ok(OrderStatus::Cancelled),
        other => Err(AdapterError::UnmappedStatus {
            channel: "threedcart".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for ThreeDCartAdapter {
    fn channel(&self) -> &'static str {
        "threedcart"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        // The products endpoint returns a bare array
        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!("/api/v1/products?limit={}&offset={}", PAGE_LIMIT, offset))
                .await?;
            Ok(data.as_array().cloned().unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "SKUInfo.CatalogID")
                .or_else(|| util::get_str(item, "catalogid"))
                .ok_or_else(|| AdapterError::malformed("threedcart product missing catalog id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "SKUInfo.Name")
                    .or_else(|| util::get_str(item, "name"))
                    .unwrap_or_default(),
                description: util::get_str(item, "Description"),
                price: item
                    .get("SKUInfo")
                    .and_then(|s| s.get("Price"))
                    .or_else(|| item.get("price"))
                    .and_then(util::parse_price),
                sku: util::get_str(item, "SKUInfo.SKU").or_else(|| util::get_str(item, "sku")),
                url: Some(format!("{}/product.asp?itemid={}", self.base_url, id)),
                image_url: util::get_str(item, "MainImageFile")
                    .or_else(|| util::get_str(item, "thumbnail")),
                stock_quantity: util::get_i64(item, "SKUInfo.Stock")
                    .or_else(|| util::get_i64(item, "stock")),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let data = self.get("/api/v1/orders?limit=50").await?;

        let items = data.as_array().cloned().unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "OrderID")
                .ok_or_else(|| AdapterError::malformed("threedcart order missing OrderID"))?;
            let status_id = util::get_i64(raw, "OrderStatusID").unwrap_or(1);

            orders.push(Order {
                id: id.clone(),
                order_number: util::get_str(raw, "InvoiceNumber").or(Some(id)),
                status: map_status_id(status_id)?,
                total: raw
                    .get("OrderAmount")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: "USD".to_string(),
                currency_defaulted: true,
                created_at: raw.get("OrderDate").and_then(util::parse_timestamp),
                updated_at: raw.get("LastUpdate").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "BillingEmail"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        Ok(FetchOrdersPage::done(orders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_store_url_and_key() {
        assert!(ThreeDCartAdapter::new(&AdapterContext::default()).is_err());
    }

    #[test]
    fn status_table_maps_known_ids() {
        assert_eq!(map_status_id(1).unwrap(), OrderStatus::Pending);
        assert_eq!(map_status_id(2).unwrap(), OrderStatus::Processing);
        assert_eq!(map_status_id(4).unwrap(), OrderStatus::Shipped);
        assert_eq!(map_status_id(5).unwrap(), OrderStatus::Cancelled);
        assert!(map_status_id(42).is_err());
    }
}
