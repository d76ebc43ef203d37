//! AliExpress channel adapter
//!
//! Open Platform gateway: every call is a POST to `/sync` with the method
//! name as a parameter and an HMAC-SHA256 signature over the sorted
//! parameter string. Responses nest the payload under
//! `{method}_response.result`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value as JsonValue;
use sha2::Sha256;

use super::util::{self, send_json};
use super::{
    AdapterContext, AdapterError, ChannelAdapter, FetchOrdersPage, Order, OrderStatus, Product,
    SyncCursor,
};

const DEFAULT_BASE_URL: &str = "https://api-sg.aliexpress.com/sync";
const PAGE_SIZE: usize = 50;

pub struct AliExpressAdapter {
    client: Client,
    gateway_url: String,
    app_key: String,
    app_secret: String,
    access_token: String,
}

impl AliExpressAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self, AdapterError> {
        let access_token = ctx
            .require(ctx.access_token.as_deref(), "an access token", "aliexpress")?
            .to_string();
        let app_key = ctx
            .require(ctx.meta_str("app_key"), "an app key", "aliexpress")?
            .to_string();
        let app_secret = ctx
            .require(ctx.meta_str("app_secret"), "an app secret", "aliexpress")?
            .to_string();

        Ok(Self {
            client: util::http_client()?,
            gateway_url: ctx
                .meta_str("api_base")
                .unwrap_or(DEFAULT_BASE_URL)
                .to_string(),
            app_key,
            app_secret,
            access_token,
        })
    }

    /// Build the signed form for a gateway `method` call.
    fn signed_form(&self, api_method: &str, extra: &[(&str, String)]) -> Vec<(String, String)> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let mut params: Vec<(String, String)> = vec![
            ("app_key".to_string(), self.app_key.clone()),
            ("access_token".to_string(), self.access_token.clone()),
            ("method".to_string(), api_method.to_string()),
            ("timestamp".to_string(), timestamp),
            ("sign_method".to_string(), "sha256".to_string()),
            ("format".to_string(), "json".to_string()),
            ("v".to_string(), "2.0".to_string()),
        ];
        for (k, v) in extra {
            params.push((k.to_string(), v.clone()));
        }
        params.sort();

        let mut base = String::new();
        for (k, v) in &params {
            base.push_str(k);
            base.push_str(v);
        }
        params.push(("sign".to_string(), sign_sha256(&self.app_secret, &base)));
        params
    }

    async fn call(
        &self,
        api_method: &str,
        extra: &[(&str, String)],
    ) -> Result<JsonValue, AdapterError> {
        let form = self.signed_form(api_method, extra);
        let data = send_json(self.client.post(&self.gateway_url).form(&form)).await?;

        if let Some(error) = data.get("error_response") {
            let code = util::get_str(error, "code").unwrap_or_default();
            let msg = util::get_str(error, "msg").unwrap_or_default();
            return Err(AdapterError::configuration(format!(
                "aliexpress gateway error {}: {}",
                code, msg
            )));
        }

        // The payload nests under "{method with dots as underscores}_response"
        let envelope = format!("{}_response", api_method.replace('.', "_"));
        Ok(data
            .get(&envelope)
            .and_then(|v| v.get("result"))
            .cloned()
            .unwrap_or(data))
    }
}

fn sign_sha256(secret: &str, base: &str) -> String {
    // Key length never exceeds the block size
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(base.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

fn map_status(value: &str) -> Result<OrderStatus, AdapterError> {
    match value.to_uppercase().as_str() {
        "PLACE_ORDER_SUCCESS" | "WAIT_BUYER_ACCEPT_GOODS_TIMEOUT" | "IN_CANCEL" => {
            Ok(OrderStatus::Pending)
        }
        "PAYMENT_SUCCESS" | "WAIT_SELLER_SEND_GOODS" | "SELLER_PART_SEND_GOODS" => {
            Ok(OrderStatus::Paid)
        }
        "WAIT_BUYER_ACCEPT_GOODS" | "WAIT_SELLER_EXAMINE_MONEY" => Ok(OrderStatus::Shipped),
        "FINISH" | "FUND_PROCESSING" => Ok(OrderStatus::Delivered),
        "PLACE_ORDER_FAILED" | "ORDER_CLOSED" | "WAIT_GROUP_SUCCESS" => Ok(OrderStatus::Cancelled),
        "RISK_CONTROL" | "IN_ISSUE" | "IN_FROZEN" => Ok(OrderStatus::Refunded),
        other => Err(AdapterError::UnmappedStatus {
            channel: "aliexpress".to_string(),
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ChannelAdapter for AliExpressAdapter {
    fn channel(&self) -> &'static str {
        "aliexpress"
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, AdapterError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let data = self
                .call(
                    "aliexpress.merchant.product.list",
                    &[
                        ("current_page", page.to_string()),
                        ("page_size", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let batch = data
                .get("products")
                .and_then(|p| p.get("product"))
                .or_else(|| data.get("products"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            let id = util::get_str(item, "product_id")
                .ok_or_else(|| AdapterError::malformed("aliexpress product missing product_id"))?;
            products.push(Product {
                id: id.clone(),
                name: util::get_str(item, "subject").unwrap_or_default(),
                price: item
                    .get("product_price")
                    .or_else(|| item.get("sku_price"))
                    .and_then(util::parse_price),
                currency: util::get_str(item, "currency_code"),
                sku: util::get_str(item, "product_sku"),
                url: Some(format!("https://www.aliexpress.com/item/{}.html", id)),
                image_url: util::get_str(item, "image_u_r_ls")
                    .map(|urls| urls.split(';').next().unwrap_or(&urls).to_string()),
                stock_quantity: util::get_i64(item, "ipm_sku_stock"),
                ..Default::default()
            });
        }
        Ok(products)
    }

    async fn fetch_orders(
        &self,
        since: Option<&SyncCursor>,
    ) -> Result<FetchOrdersPage, AdapterError> {
        let mut extra = vec![
            ("current_page", "1".to_string()),
            ("page_size", PAGE_SIZE.to_string()),
        ];
        if let Some(watermark) = since.and_then(|c| c.as_str()) {
            extra.push(("modified_date_start", watermark.to_string()));
        }

        let data = self.call("aliexpress.trade.seller.orderlist", &extra).await?;

        let items = data
            .get("target_list")
            .and_then(|t| t.get("order_dto"))
            .or_else(|| data.get("orders"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(items.len());
        for raw in &items {
            let id = util::get_str(raw, "order_id")
                .ok_or_else(|| AdapterError::malformed("aliexpress order missing order_id"))?;
            let status_value = util::get_str(raw, "order_status")
                .unwrap_or_else(|| "PLACE_ORDER_SUCCESS".to_string());

            let total = raw.get("order_amount");
            let currency = total.and_then(util::price_currency);
            let currency_defaulted = currency.is_none();

            orders.push(Order {
                id: id.clone(),
                order_number: Some(id),
                status: map_status(&status_value)?,
                total: total
                    .and_then(util::parse_price)
                    .unwrap_or_else(|| "0.00".to_string()),
                currency: currency.unwrap_or_else(|| "USD".to_string()),
                currency_defaulted,
                created_at: raw.get("gmt_create").and_then(util::parse_timestamp),
                updated_at: raw.get("gmt_update").and_then(util::parse_timestamp),
                customer_email: None,
                shipping_address: None,
                line_items: Vec::new(),
                raw: raw.clone(),
            });
        }

        let next_cursor = orders
            .iter()
            .filter_map(|o| o.updated_at.or(o.created_at))
            .max()
            .map(|ts| SyncCursor::from_string(ts.to_rfc3339()));

        let has_more = items.len() >= PAGE_SIZE;
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> AdapterContext {
        AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({ "app_key": "500100", "app_secret": "shh" }),
            ..Default::default()
        }
    }

    #[test]
    fn new_requires_app_key_secret_and_token() {
        assert!(AliExpressAdapter::new(&AdapterContext::default()).is_err());
        assert!(AliExpressAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({ "app_secret": "shh" }),
            ..Default::default()
        })
        .is_err());
        assert!(AliExpressAdapter::new(&context()).is_ok());
    }

    #[test]
    fn signed_form_carries_gateway_params_and_signature() {
        let adapter = AliExpressAdapter::new(&context()).unwrap();
        let form = adapter.signed_form("aliexpress.trade.seller.orderlist", &[]);

        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("app_key"), Some("500100"));
        assert_eq!(get("method"), Some("aliexpress.trade.seller.orderlist"));
        assert_eq!(get("sign_method"), Some("sha256"));
        assert_eq!(get("v"), Some("2.0"));
        let sign = get("sign").unwrap();
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_mapping_covers_trade_states() {
        assert_eq!(
            map_status("PLACE_ORDER_SUCCESS").unwrap(),
            OrderStatus::Pending
        );
        assert_eq!(
            map_status("WAIT_SELLER_SEND_GOODS").unwrap(),
            OrderStatus::Paid
        );
        assert_eq!(
            map_status("WAIT_BUYER_ACCEPT_GOODS").unwrap(),
            OrderStatus::Shipped
        );
        assert_eq!(map_status("FINISH").unwrap(), OrderStatus::Delivered);
        assert!(map_status("TELEPORTED").is_err());
    }

    #[tokio::test]
    async fn gateway_errors_surface_as_configuration_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_response": { "code": "27", "msg": "Invalid session" }
            })))
            .mount(&server)
            .await;

        let adapter = AliExpressAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({
                "app_key": "500100",
                "app_secret": "shh",
                "api_base": format!("{}/sync", server.uri())
            }),
            ..Default::default()
        })
        .unwrap();

        let err = adapter.fetch_orders(None).await.unwrap_err();
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[tokio::test]
    async fn order_envelope_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aliexpress_trade_seller_orderlist_response": {
                    "result": {
                        "target_list": {
                            "order_dto": [{
                                "order_id": 8123456789u64,
                                "order_status": "WAIT_SELLER_SEND_GOODS",
                                "order_amount": { "amount": "45.80", "currency_code": "USD" },
                                "gmt_create": "2025-07-01T12:00:00Z",
                                "gmt_update": "2025-07-02T12:00:00Z"
                            }]
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let adapter = AliExpressAdapter::new(&AdapterContext {
            access_token: Some("token".to_string()),
            metadata: json!({
                "app_key": "500100",
                "app_secret": "shh",
                "api_base": format!("{}/sync", server.uri())
            }),
            ..Default::default()
        })
        .unwrap();

        let page = adapter.fetch_orders(None).await.unwrap();
        assert_eq!(page.orders.len(), 1);
        let order = &page.orders[0];
        assert_eq!(order.id, "8123456789");
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.total, "45.80");
        assert_eq!(order.currency, "USD");
        assert_eq!(
            page.next_cursor.as_ref().and_then(|c| c.as_str()),
            Some("2025-07-02T12:00:00+00:00")
        );
    }
}
