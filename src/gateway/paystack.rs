// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Paystack charge API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;

use super::{
    ChargeAuthorization, ChargeRequest, ChargeStatus, ChargeVerification, GatewayError,
    PaymentGateway,
};
use crate::money::Money;

const DEFAULT_API_BASE_URL: &str = "https://api.paystack.co";

/// HTTP client for the Paystack transaction API.
#[derive(Debug, Clone)]
pub struct PaystackClient {
    api_base_url: String,
    secret_key: String,
    http: Client,
}

impl PaystackClient {
    /// Whether the environment carries enough configuration to build a client.
    pub fn is_configured() -> bool {
        env_optional("PAYSTACK_SECRET_KEY").is_some()
    }

    /// Build a client from `PAYSTACK_*` environment variables.
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_base_url = env_or_default("PAYSTACK_API_BASE_URL", DEFAULT_API_BASE_URL);
        let secret_key = env_required("PAYSTACK_SECRET_KEY")?;
        Self::new(api_base_url, secret_key)
    }

    /// Build a client with explicit configuration.
    pub fn new(
        api_base_url: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: api_base_url.into(),
            secret_key: secret_key.into(),
            http,
        })
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .bearer_auth(&self.secret_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("POST {path} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("POST {path} body read failed: {e}")))?;

        classify_http_status(path, status, &body)?;

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("POST {path} invalid JSON: {e}")))
    }

    async fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("GET {path} body read failed: {e}")))?;

        classify_http_status(path, status, &body)?;

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("GET {path} invalid JSON: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeAuthorization, GatewayError> {
        let mut payload = json!({
            "email": request.email,
            "amount": request.amount.minor(),
            "reference": request.reference,
            "metadata": request.metadata,
        });
        if let Some(callback_url) = &request.callback_url {
            payload["callback_url"] = Value::String(callback_url.clone());
        }

        let response = self.post_json("/transaction/initialize", &payload).await?;

        info!(
            reference = %request.reference,
            "Paystack initialize_charge: charge created"
        );

        parse_init_response(&response)
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<ChargeVerification, GatewayError> {
        let response = self
            .get_json(&format!("/transaction/verify/{reference}"))
            .await?;
        parse_verify_response(&response)
    }
}

/// Map an HTTP status onto the gateway error taxonomy.
///
/// 5xx is transient, 404 means the gateway has no such record, any other
/// non-success answer is a confirmed rejection.
fn classify_http_status(path: &str, status: StatusCode, body: &str) -> Result<(), GatewayError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() {
        return Err(GatewayError::Unavailable(format!(
            "{path} returned {status}: {body}"
        )));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(format!(
            "{path} returned {status}: {body}"
        )));
    }
    Err(GatewayError::Rejected(format!(
        "{path} returned {status}: {body}"
    )))
}

fn parse_init_response(response: &Value) -> Result<ChargeAuthorization, GatewayError> {
    ensure_body_status(response)?;

    let authorization_url = response
        .pointer("/data/authorization_url")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidResponse("missing authorization_url in response".to_string())
        })?
        .to_string();

    let access_code = response
        .pointer("/data/access_code")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidResponse("missing access_code in response".to_string())
        })?
        .to_string();

    Ok(ChargeAuthorization {
        authorization_url,
        access_code,
    })
}

fn parse_verify_response(response: &Value) -> Result<ChargeVerification, GatewayError> {
    ensure_body_status(response)?;

    let raw_status = response
        .pointer("/data/status")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidResponse("missing charge status in response".to_string())
        })?;

    let amount = response
        .pointer("/data/amount")
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            GatewayError::InvalidResponse("missing charge amount in response".to_string())
        })?;

    let gateway_response = response
        .pointer("/data/gateway_response")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ChargeVerification {
        status: ChargeStatus::from_raw(raw_status),
        amount: Money::from_minor(amount),
        gateway_response,
    })
}

/// The API wraps every body in `{"status": bool, "message": ...}`; a `false`
/// status on a 2xx answer is still a rejection.
fn ensure_body_status(response: &Value) -> Result<(), GatewayError> {
    match response.get("status").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request not accepted");
            Err(GatewayError::Rejected(message.to_string()))
        }
        None => Err(GatewayError::InvalidResponse(
            "missing status flag in response".to_string(),
        )),
    }
}

fn env_required(name: &str) -> Result<String, GatewayError> {
    env_optional(name)
        .ok_or_else(|| GatewayError::Unavailable(format!("missing configuration: {name}")))
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_response_extracts_redirect_handle() {
        let body = json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/abc123",
                "access_code": "abc123",
                "reference": "dep_1000_u1"
            }
        });
        let auth = parse_init_response(&body).expect("valid init response");
        assert_eq!(auth.authorization_url, "https://checkout.paystack.com/abc123");
        assert_eq!(auth.access_code, "abc123");
    }

    #[test]
    fn init_response_with_false_status_is_rejected() {
        let body = json!({ "status": false, "message": "Invalid email" });
        let err = parse_init_response(&body).expect_err("false status should fail");
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn verify_response_maps_status_and_amount() {
        let body = json!({
            "status": true,
            "data": {
                "status": "success",
                "amount": 500000,
                "gateway_response": "Approved"
            }
        });
        let verification = parse_verify_response(&body).expect("valid verify response");
        assert_eq!(verification.status, ChargeStatus::Success);
        assert_eq!(verification.amount.minor(), 500_000);
        assert_eq!(verification.gateway_response.as_deref(), Some("Approved"));
    }

    #[test]
    fn verify_response_without_data_is_invalid() {
        let body = json!({ "status": true, "message": "ok" });
        let err = parse_verify_response(&body).expect_err("missing data should fail");
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn http_status_classification_separates_transient_from_terminal() {
        assert!(matches!(
            classify_http_status("/x", StatusCode::BAD_GATEWAY, ""),
            Err(GatewayError::Unavailable(_))
        ));
        assert!(matches!(
            classify_http_status("/x", StatusCode::NOT_FOUND, ""),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            classify_http_status("/x", StatusCode::BAD_REQUEST, ""),
            Err(GatewayError::Rejected(_))
        ));
        assert!(classify_http_status("/x", StatusCode::OK, "").is_ok());
    }
}
