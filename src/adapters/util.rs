//! Shared helpers for channel adapters
//!
//! Price normalization, JSON-path extraction, timestamp parsing, and the
//! common HTTP send/decode path all adapters go through.

use std::future::Future;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use super::AdapterError;

/// Normalize a channel price value into a two-decimal string.
///
/// Accepts the forms seen across channel APIs: plain numbers, numeric
/// strings, Etsy-style `{amount, divisor}` minor-unit objects, and
/// `{amount, currency}` objects carrying a decimal amount.
pub fn parse_price(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => n.as_f64().map(format_2dp),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().map(format_2dp),
        JsonValue::Object(obj) => {
            let amount = obj.get("amount")?;
            if let Some(divisor) = obj.get("divisor") {
                let amount = json_f64(amount)?;
                let divisor = json_f64(divisor)?;
                if divisor == 0.0 {
                    return None;
                }
                Some(format_2dp(amount / divisor))
            } else {
                parse_price(amount)
            }
        }
        _ => None,
    }
}

/// Currency code attached to a price object, when present
pub fn price_currency(value: &JsonValue) -> Option<String> {
    let obj = value.as_object()?;
    obj.get("currency_code")
        .or_else(|| obj.get("currency"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase())
}

/// Format a float as a two-decimal string
pub fn format_2dp(value: f64) -> String {
    format!("{:.2}", value)
}

fn json_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract a string at a dotted path, coercing numbers to their display form
pub fn get_str(value: &JsonValue, path: &str) -> Option<String> {
    let target = walk(value, path)?;
    match target {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract a float at a dotted path, accepting numeric strings
pub fn get_f64(value: &JsonValue, path: &str) -> Option<f64> {
    json_f64(walk(value, path)?)
}

/// Extract an integer at a dotted path, accepting numeric strings
pub fn get_i64(value: &JsonValue, path: &str) -> Option<i64> {
    let target = walk(value, path)?;
    match target {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn walk<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(obj) => obj.get(segment)?,
            JsonValue::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parse an epoch-seconds or RFC3339 timestamp value
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                s.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            }),
        _ => None,
    }
}

/// Drain an offset-paged listing endpoint.
///
/// Calls `fetch` with a running item offset and accumulates pages until
/// one comes back shorter than `page_limit`, which every offset-style
/// channel API uses to signal the last page.
pub async fn paginate_offset<F, Fut>(
    page_limit: usize,
    mut fetch: F,
) -> Result<Vec<JsonValue>, AdapterError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<JsonValue>, AdapterError>>,
{
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch(offset).await?;
        let page_len = page.len();
        items.extend(page);
        if page_len < page_limit {
            break;
        }
        offset += page_len;
    }
    Ok(items)
}

/// Percent-encode a value spliced into a query string. RFC3339
/// watermarks carry a '+' that would otherwise decode server-side as a
/// space.
pub fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Pull the `rel="next"` URL out of an RFC 5988 `Link` header
pub fn parse_link_header(header: &str) -> Option<String> {
    for part in header.split(',') {
        let part = part.trim();
        let (target, params) = part.split_once(';')?;
        if params.contains("rel=\"next\"") || params.contains("rel=next") {
            return Some(
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            );
        }
    }
    None
}

/// Send a prepared request and decode the JSON body.
///
/// Maps transport failures to `AdapterError::Network` (retryable for
/// timeouts and connection errors), non-2xx statuses to
/// `AdapterError::Http` with a truncated body, 429 to
/// `AdapterError::RateLimited` honoring `Retry-After`, and undecodable
/// bodies to `AdapterError::Malformed`.
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<JsonValue, AdapterError> {
    let (body, _) = send_json_with_next_link(request).await?;
    Ok(body)
}

/// `send_json`, also returning the `rel="next"` URL from the response's
/// `Link` header for channels that paginate through it.
pub async fn send_json_with_next_link(
    request: reqwest::RequestBuilder,
) -> Result<(JsonValue, Option<String>), AdapterError> {
    let response = request.send().await.map_err(|err| AdapterError::Network {
        details: err.to_string(),
        retryable: err.is_timeout() || err.is_connect() || err.is_request(),
    })?;

    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(AdapterError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.ok().map(|b| truncate(&b, 500));
        return Err(AdapterError::Http {
            status: status.as_u16(),
            body,
        });
    }

    // The Link header has to come off before the body consumes the response
    let next_link = response
        .headers()
        .get(reqwest::header::LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_link_header);

    let body = response.text().await.map_err(|err| AdapterError::Network {
        details: err.to_string(),
        retryable: true,
    })?;

    if body.trim().is_empty() {
        return Ok((JsonValue::Null, next_link));
    }

    let value = serde_json::from_str(&body)
        .map_err(|err| AdapterError::malformed(format!("invalid JSON body: {}", err)))?;
    Ok((value, next_link))
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        body.to_string()
    } else {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

/// Shared reqwest client builder for adapters
pub fn http_client() -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|err| AdapterError::configuration(format!("http client build failed: {}", err)))
}
