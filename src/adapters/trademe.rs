//! Trade Me channel adapter
//!
//! OAuth 1.0a with the PLAINTEXT signature method: consumer key/secret come
//! from connection metadata, token and token secret from the credential
//! store. All amounts are NZD.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api.trademe.co.nz";
const PAGE_ROWS: usize = 50;

pub struct TradeMeAdapter {
    client: Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    access_token: String,
    token_secret: String,
}

impl TradeMeAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "trademe")?
            .to_string();
        let consumer_key = ctx
            .require(ctx.meta_str("consumer_key"), "a consumer key", "trademe")?
            .to_string();
        let consumer_secret = ctx
            .require(ctx.meta_str("consumer_secret"), "a consumer secret", "trademe")?
            .to_string();
        let token_secret = ctx
            .require(ctx.meta_str("token_secret"), "a token secret", "trademe")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            base_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            consumer_key,
            consumer_secret,
            access_token,
            token_secret,
        })
    }

    fn oauth_header(&self) -> String {
        format!(
            "OAuth oauth_consumer_key=\"{}\", oauth_token=\"{}\", \
             oauth_signature_method=\"PLAINTEXT\", oauth_signature=\"{}&{}\"",
            self.consumer_key, self.access_token, self.consumer_secret, self.token_secret
        )
    }

    async fn get(&self, url: String) -> Result<JsonValue, AdapterError> {
        send_json(self.client.get(url).header("Authorization", self.oauth_header())).await
    }
}

/// Sold items report payment and delivery booleans rather than a status
fn map_sold_item(raw: &JsonValue) -> OrderStatus {
    let paid = util::get_str(raw, "PaymentMethod").is_some()
        || raw.get("IsPaid").and_then(|v| v.as_bool()) == Some(true);
    let shipped = raw.get("HasBeenDispatched").and_then(|v| v.as_bool()) == Some(true);
    if shipped {
        OrderStatus::Shipped
    } else if paid {
        OrderStatus::Paid
    } else {
        OrderStatus::Pending
    }
}

#[async_trait]
impl ChannelAdapter for TradeMeAdapter {
    fn channel(&self) -> &'static str {
        "trademe"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/v1/Listings.json?rows={}&page={}",
                self.base_url, PAGE_ROWS, page
            );
            let data = self.get(url).await?;
            let batch = data
                .get("List")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PAGE_ROWS {
                break;
            }
            page += 1;
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "ListingId")
                .ok_or_else(|| AdapterError::malformed("trademe listing missing ListingId"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "Title").unwrap_or_default(),
                description: util::get_str(item, "Body"),
                price: item
                    .get("BuyNowPrice")
                    .and_then(util::parse_price)
                    .or_else(|| item.get("StartPrice").and_then(util::parse_price)),
                currency: Some("NZD".to_string()),
                sku: util::get_str(item, "SKU").or(Some(id.clone())),
                url: Some(format!("https://www.trademe.co.nz/a.aspx?id={}", id)),
                image_url: util::get_str(item, "PictureHref"),
                stock_quantity: util::get_i64(item, "Quantity").or(Some(1)),
                categories: util::get_str(item, "CategoryName").into_iter().collect(),
                brand: util::get_str(item, "Brand"),
                variants: Vec::new(),
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        _since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let url = format!("{}/v1/MyTradeMe/SoldItems/All.json?rows={}", self.base_url, PAGE_ROWS);
        let data = self.get(url).await?;

        let items = data
            .get("List")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "PurchaseId")
                .or_else(|| util::get_str(raw, "ListingId"))
                .ok_or_else(|| AdapterError::malformed("trademe sold item missing PurchaseId"))?;

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_sold_item(raw),
                total: raw
                    .get("SalePrice")
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: "NZD".to_string(),
                currency_defaulted: false,
                created_at: raw.get("SoldDate").and_then(parse_ms_date),
                updated_at: raw.get("SoldDate").and_then(parse_ms_date),
                customer_email: util::get_str(raw, "Buyer.Email"),
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        Ok(FetchOrdersPage::done(orders))
    }
}

/// Trade Me dates are `/Date(1735689600000)/`
fn parse_ms_date(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    let millis: i64 = s
        .trim_start_matches("/Date(")
        .trim_end_matches(")/")
        .parse()
        .ok()?;
    chrono::TimeZone::timestamp_millis_opt(&chrono::Utc, millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> AdapterContext {
        AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({
                "consumer_key": "ck",
                "consumer_secret": "cs",
                "token_secret": "ts"
            }),
            ..Default::default()
        }
    }

    #[test]
    fn new_requires_full_oauth1_credential_set() {
        assert!(TradeMeAdapter::new(&AdapterContext::default()).is_err());
        assert!(TradeMeAdapter::new(&context()).is_ok());
    }

    #[test]
    fn oauth_header_uses_plaintext_signature() {
        let adapter = TradeMeAdapter::new(&context()).unwrap();
        let header = adapter.oauth_header();
        assert!(header.contains("oauth_consumer_key=\"ck\""));
        assert!(header.contains("oauth_signature_method=\"PLAINTEXT\""));
        assert!(header.contains("oauth_signature=\"cs&ts\""));
    }

    #[test]
    fn sold_items_classify_from_flags() {
        assert_eq!(
            map_sold_item(&json!({ "HasBeenDispatched": true, "IsPaid": true })),
            OrderStatus::Shipped
        );
        assert_eq!(
            map_sold_item(&json!({ "IsPaid": true })),
            OrderStatus::Paid
        );
        assert_eq!(map_sold_item(&json!({})), OrderStatus::Pending);
    }

    #[test]
    fn ms_date_format_parses() {
        let parsed = parse_ms_date(&json!("/Date(1735689600000)/")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
