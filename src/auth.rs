//! # Authentication
//!
//! Operator bearer-token auth plus seller scoping. Every protected
//! route requires a configured operator token and an `X-Seller-Id`
//! header; the middleware stamps both onto the request extensions so
//! handlers can take them as extractors instead of re-parsing headers.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id, validation_error};
use crate::server::AppState;
use crate::telemetry::TraceContext;

const SELLER_HEADER: &str = "X-Seller-Id";

/// Seller scope of an authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SellerId(pub Uuid);

/// Marker proving the bearer token was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Extractor yielding the seller scope stamped by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct SellerExtension(pub SellerId);

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the bearer token and seller header, then stamps
/// [`OperatorAuth`] and [`SellerExtension`] onto the request.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // The task-local trace context is not active yet at this layer, so
    // rejections carry the trace ID from the request extension instead.
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = bearer_token(request.headers(), trace_id.as_deref())?;
    check_operator_token(&config, token)?;
    let seller = seller_scope(request.headers())?;
    tracing::info!(seller_id = %seller.0, "Authenticated operator request");

    request.extensions_mut().insert(SellerExtension(seller));
    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

fn reject(message: &str, trace_id: Option<&str>) -> ApiError {
    match trace_id {
        Some(id) => unauthorized_with_trace_id(Some(message), id.to_string()),
        None => unauthorized(Some(message)),
    }
}

fn bearer_token<'a>(headers: &'a HeaderMap, trace_id: Option<&str>) -> Result<&'a str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| reject("Missing Authorization header", trace_id))?
        .to_str()
        .map_err(|_| reject("Invalid Authorization header", trace_id))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| reject("Authorization header must use Bearer scheme", trace_id))
}

fn check_operator_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    // Constant-time comparison against every configured token
    let matched = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if matched {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

fn seller_scope(headers: &HeaderMap) -> Result<SellerId, ApiError> {
    let raw = headers
        .get(SELLER_HEADER)
        .ok_or_else(|| {
            validation_error(
                "Missing required header",
                serde_json::json!({ SELLER_HEADER: "Required header is missing" }),
            )
        })?
        .to_str()
        .map_err(|_| {
            validation_error(
                "Invalid seller header",
                serde_json::json!({ SELLER_HEADER: "Header must be valid UTF-8" }),
            )
        })?;

    raw.parse::<Uuid>().map(SellerId).map_err(|_| {
        validation_error(
            "Invalid seller ID",
            serde_json::json!({ SELLER_HEADER: "Must be a valid UUID" }),
        )
    })
}

impl<S> FromRequestParts<S> for SellerExtension
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SellerExtension>()
            .cloned()
            .ok_or_else(|| {
                validation_error(
                    "Seller context missing",
                    serde_json::json!({ SELLER_HEADER: "Seller context not present" }),
                )
            })
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}
