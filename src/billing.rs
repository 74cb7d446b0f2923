//! Payments: checkout creation and signed webhook handling.
//!
//! A free session becomes paid when the payment provider calls back with a
//! completed checkout carrying `metadata.session_id`. Webhook payloads are
//! authenticated with the provider's HMAC-SHA256 scheme before anything is
//! read from them.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use concierge_core::error::{Error, Result};
use concierge_core::models::SessionMode;

use crate::clients::Clients;
use crate::config::Config;
use crate::sessions::{self, SessionUpdate};

/// A hosted checkout page created for one chat session.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, session_id: &str) -> Result<CheckoutSession>;
}

// ============ Stripe ============

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
    price_cents: i64,
    currency: String,
    product_name: String,
    public_url: String,
}

impl StripeGateway {
    pub fn new(config: &Config, secret_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::upstream("payments", e))?;
        Ok(Self {
            http,
            secret_key,
            api_base: config.billing.api_base.trim_end_matches('/').to_string(),
            price_cents: config.billing.price_cents,
            currency: config.billing.currency.clone(),
            product_name: config.billing.product_name.clone(),
            public_url: config.server.public_url.trim_end_matches('/').to_string(),
        })
    }

    fn checkout_form(&self, session_id: &str) -> Vec<(String, String)> {
        vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                self.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                self.price_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                self.product_name.clone(),
            ),
            ("metadata[session_id]".into(), session_id.to_string()),
            (
                "success_url".into(),
                format!(
                    "{}?payment_success=true&session_id={}",
                    self.public_url, session_id
                ),
            ),
            (
                "cancel_url".into(),
                format!(
                    "{}?payment_cancelled=true&session_id={}",
                    self.public_url, session_id
                ),
            ),
        ]
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, session_id: &str) -> Result<CheckoutSession> {
        let response = self
            .http
            .post(format!("{}/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&self.checkout_form(session_id))
            .send()
            .await
            .map_err(|e| Error::upstream("payments", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "payments",
                format!("checkout creation failed {}: {}", status, body),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::upstream("payments", e))?;
        let field = |name: &str| {
            json.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::upstream("payments", format!("checkout response missing '{}'", name))
                })
        };
        Ok(CheckoutSession {
            id: field("id")?,
            url: field("url")?,
        })
    }
}

// ============ Checkout ============

/// Start checkout for a chat session.
///
/// The session must exist and must not already be paid. `gateway` is the
/// configured provider; the caller maps its absence to 503.
pub async fn start_checkout(
    clients: &Clients,
    gateway: &dyn PaymentGateway,
    session_id: &str,
) -> Result<CheckoutSession> {
    let session = sessions::get(clients.pool(), session_id).await?;
    if session.is_paid() {
        return Err(Error::validation("Session is already paid"));
    }
    let checkout = gateway.create_checkout(&session.id).await?;
    info!(session_id = %session.id, checkout_id = %checkout.id, "checkout created");
    Ok(checkout)
}

// ============ Webhook ============

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing stripe-signature header")]
    Missing,
    #[error("Malformed stripe-signature header")]
    Malformed,
    #[error("Webhook timestamp outside tolerance")]
    Expired,
    #[error("Invalid signature")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// The signed payload is `"{t}.{body}"`. Any `v1` entry may match; the
/// comparison is constant-time. `now` is the current unix time.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let mac = signed_mac(payload, secret, timestamp)?;
    let matched = signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn signed_mac(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Compute a `Stripe-Signature` header value for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mac = signed_mac(payload, secret, timestamp)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// What a verified webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    SessionUpgraded { session_id: String },
    Logged,
    Ignored,
}

/// Apply a verified webhook event.
pub async fn handle_event(clients: &Clients, payload: &[u8]) -> Result<WebhookOutcome> {
    let event: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| Error::validation(format!("Invalid webhook payload: {}", e)))?;
    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let object = &event["data"]["object"];
    let object_id = object.get("id").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "checkout.session.completed" => {
            let Some(session_id) = object["metadata"]
                .get("session_id")
                .and_then(|v| v.as_str())
            else {
                error!(checkout_id = object_id, "no session_id in checkout metadata");
                return Ok(WebhookOutcome::Ignored);
            };
            let update = SessionUpdate {
                mode: Some(SessionMode::Paid),
                payment_id: Some(object_id.to_string()),
                ..SessionUpdate::default()
            };
            match sessions::update(clients.pool(), session_id, &update).await {
                Ok(_) => {
                    info!(session_id, "session upgraded to paid");
                    Ok(WebhookOutcome::SessionUpgraded {
                        session_id: session_id.to_string(),
                    })
                }
                Err(e) if e.kind() == concierge_core::ErrorKind::NotFound => {
                    warn!(session_id, "checkout completed for unknown session");
                    Ok(WebhookOutcome::Ignored)
                }
                Err(e) => Err(e),
            }
        }
        "payment_intent.succeeded" => {
            info!(payment_intent = object_id, "payment intent succeeded");
            Ok(WebhookOutcome::Logged)
        }
        "payment_intent.payment_failed" => {
            error!(payment_intent = object_id, "payment intent failed");
            Ok(WebhookOutcome::Logged)
        }
        other => {
            info!(event_type = other, "unhandled webhook event type");
            Ok(WebhookOutcome::Ignored)
        }
    }
}
