//! nopCommerce channel adapter
//!
//! The nop API plugin exposes bearer-token REST endpoints with
//! Pascal-cased payloads.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

pub struct NopCommerceAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NopCommerceAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let base_url = ctx
            .require(ctx.store_url.as_deref(), "a store url", "nopcommerce")?
            .trim_end_matches('/')
            .to_string();
        let api_key = ctx
            .require(ctx.api_key.as_deref(), "an api key", "nopcommerce")?
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

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value {
        "Pending" => Ok(OrderStatus::Pending),
        "Processing" => Ok(OrderStatus::Processing),
        "Shipped" => Ok(OrderStatus::Shipped),
        "Complete" | "Delivered" => Ok(OrderStatus::Delivered),
        "Cancelled" => Ok(OrderStatus::Cancelled),
        "Refunded" | "PartiallyRefunded" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "nopcommerce".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for NopCommerceAdapter {
    fn channel(&self) -> &'static str {
        "nopcommerce"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        const PAGE_LIMIT: usize = 100;

        let items = util::paginate_offset(PAGE_LIMIT, |offset| async move {
            let data = self
                .get(&format!("/api/products?limit={}&offset={}", PAGE_LIMIT, offset))
                .await?;
            Ok(data.as_array().cloned().unwrap_or_default())
        })
        .await?;

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "Id")
                .ok_or_else(|| AdapterError::malformed("nopcommerce product missing Id"))?;
            products.push(Product {
                id,
                name: util::get_str(item, "Name").unwrap_or_default(),
                description: util::get_str(item, "ShortDescription")
                    .or_else(|| util::get_str(item, "FullDescription")),
                price: item.get("Price").and_then(util::parse_price),
                sku: util::get_str(item, "Sku"),
                url: util::get_str(item, "SeName")
                    .map(|name| format!("{}/{}", self.base_url, name)),
                image_url: util::get_str(item, "DefaultPictureModel.ImageUrl")
                    .map(|img| format!("{}{}", self.base_url, img)),
                stock_quantity: util::get_i64(item, "StockQuantity"),
                categories: item
                    .get("CategoryModels")
                    .and_then(|v| v.as_array())
                    .map(|cats| {
                        cats.iter()
                            .filter_map(|c| util::get_str(c, "Name"))
                            .collect()
                    })
                    .unwrap_or_default(),
                brand: util::get_str(item, "ManufacturerModels.0.Name"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let data = self.get("/api/orders?limit=50").await?;

        let items = data.as_array().cloned().unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "Id")
                .ok_or_else(|| AdapterError::malformed("nopcommerce order missing Id"))?;
            let status_value =
                util::get_str(raw, "OrderStatus").unwrap_or_else(|| "Pending".to_string());
            let currency = util::get_str(raw, "CustomerCurrencyCode");
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: util::get_str(raw, "CustomOrderNumber").or(Some(id)),
                status: map_status(&status_value)?,
                total: raw
                    .get("OrderTotal")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("CreatedOnUtc").and_then(util::parse_timestamp),
                updated_at: raw.get("UpdatedOnUtc").and_then(util::parse_timestamp),
                customer_email: util::get_str(raw, "CustomerEmail"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        Ok(FetchOrdersPage::done(orders))
    }
}
