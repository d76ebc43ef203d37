//! # Cursor Utilities
//!
//! This module provides utilities for encoding and decoding pagination cursors
//! with comprehensive validation and security checks.

use crate::error::ApiError;
use axum::http::StatusCode;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Keyset cursor over (created_at, id), the ordering used by the listing
/// endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorData {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Encode cursor data as an opaque base64 string
pub fn encode_cursor(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    encode_generic_cursor(&CursorData {
        created_at: *created_at,
        id: *id,
    })
}

/// Decode cursor data from an opaque base64 string with validation
pub fn decode_cursor(cursor: &str) -> Result<CursorData, ApiError> {
    let data: CursorData = decode_generic_cursor(cursor)?;

    // Reject timestamps outside a plausible window
    let now = Utc::now();
    if data.created_at < now - chrono::Duration::days(3650) {
        return Err(validation("cursor timestamp is too old"));
    }
    if data.created_at > now + chrono::Duration::days(365) {
        return Err(validation("cursor timestamp is too far in the future"));
    }

    if data.id == Uuid::nil() {
        return Err(validation("cursor contains invalid ID"));
    }

    Ok(data)
}

/// Encode any serializable cursor payload as an opaque base64 string
pub fn encode_generic_cursor<T: Serialize>(data: &T) -> String {
    let json = serde_json::to_string(data).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json.as_bytes())
}

/// Decode an opaque base64 cursor into the given payload type, rejecting
/// oversized, malformed, or non-UTF-8 input before parsing.
pub fn decode_generic_cursor<T: DeserializeOwned>(cursor: &str) -> Result<T, ApiError> {
    if cursor.len() > 1000 {
        return Err(validation("cursor is too long"));
    }

    if cursor.is_empty() {
        return Err(validation("cursor cannot be empty"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(validation("cursor contains invalid characters"));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cursor)
        .map_err(|_| validation("cursor is not valid base64"))?;

    if decoded.is_empty() {
        return Err(validation("cursor is empty after decoding"));
    }

    if decoded.len() > 500 {
        return Err(validation("decoded cursor is too large"));
    }

    let json = String::from_utf8(decoded)
        .map_err(|_| validation("cursor contains invalid UTF-8 data"))?;

    serde_json::from_str(&json).map_err(|_| validation("cursor contains invalid JSON structure"))
}

fn validation(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_cursor_encoding_decoding() {
        let created_at = Utc::now();
        let id = Uuid::new_v4();

        let cursor_str = encode_cursor(&created_at, &id);
        let decoded = decode_cursor(&cursor_str).unwrap();

        assert_eq!(decoded.created_at, created_at);
        assert_eq!(decoded.id, id);
    }

    #[test]
    fn test_invalid_cursor_decoding() {
        let invalid_cursor = "invalid-base64!";
        let result = decode_cursor(invalid_cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_cursor() {
        let result = decode_cursor("");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("cannot be empty"));
    }

    #[test]
    fn test_cursor_too_long() {
        let long_cursor = "a".repeat(1001);
        let result = decode_cursor(&long_cursor);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("too long"));
    }

    #[test]
    fn test_cursor_invalid_characters() {
        let invalid_cursor = "cursor@#$%";
        let result = decode_cursor(invalid_cursor);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("invalid characters"));
    }

    #[test]
    fn test_cursor_invalid_utf8() {
        // Base64 that decodes to invalid UTF-8
        let invalid_utf8_base64 = "//8=";
        let result = decode_cursor(invalid_utf8_base64);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("invalid UTF-8"));
    }

    #[test]
    fn test_cursor_invalid_json() {
        let invalid_json_base64 = "aW52YWxpZCBqc29u"; // "invalid json"
        let result = decode_cursor(invalid_json_base64);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("invalid JSON structure"));
    }

    #[test]
    fn test_cursor_timestamp_too_future() {
        let created_at = Utc::now() + chrono::Duration::days(400);
        let id = Uuid::new_v4();

        let cursor_str = encode_cursor(&created_at, &id);
        let result = decode_cursor(&cursor_str);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("too far in the future"));
    }

    #[test]
    fn test_cursor_nil_uuid() {
        let created_at = Utc::now();
        let id = Uuid::nil();

        let cursor_str = encode_cursor(&created_at, &id);
        let result = decode_cursor(&cursor_str);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("invalid ID"));
    }

    #[test]
    fn test_cursor_decoded_too_large() {
        let large_data = "x".repeat(600);
        let json = format!(
            r#"{{"created_at":"2024-01-01T00:00:00Z","id":"550e8400-e29b-41d4-a716-446655440000","data":"{}"}}"#,
            large_data
        );
        let cursor_str = base64::engine::general_purpose::STANDARD.encode(json.as_bytes());

        let result = decode_cursor(&cursor_str);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_FAILED".into());
        assert!(err.message.contains("too large"));
    }

    #[test]
    fn test_generic_cursor_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct PageToken {
            offset: u64,
            page: u32,
        }

        let token = PageToken {
            offset: 150,
            page: 3,
        };
        let encoded = encode_generic_cursor(&token);
        let decoded: PageToken = decode_generic_cursor(&encoded).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_generic_cursor_ignores_extra_fields() {
        let current_time = Utc::now();
        let json = format!(
            r#"{{"created_at":"{}","id":"550e8400-e29b-41d4-a716-446655440000","injected":true}}"#,
            current_time.to_rfc3339()
        );
        let cursor = base64::engine::general_purpose::STANDARD.encode(json.as_bytes());
        let result = decode_cursor(&cursor);
        // Extra fields are ignored by serde
        assert!(result.is_ok());
    }
}
