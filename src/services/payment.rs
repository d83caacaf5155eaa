use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ring::hmac::{self, Key};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{ServiceError, ServiceResult};
use crate::util::constant_time_cmp;
use crate::util::gateway::{OrderRequest, PaymentGateway};

pub const CURRENCY: &str = "INR";
pub const CAPTURED: &str = "captured";

const ORDER_FAILED: &str = "Failed to create payment order";
const VERIFY_FAILED: &str = "Failed to verify payment";

/// Event registration form data, forwarded to the gateway as order notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registrant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub institution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub id: String,
    pub currency: String,
    pub amount: u64,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub payment_id: String,
    pub registration_id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    #[instrument(skip(self, registrant))]
    pub async fn create_order(
        &self,
        event_id: Option<&str>,
        amount: Option<i64>,
        registrant: Option<&Registrant>,
    ) -> ServiceResult<CreatedOrder> {
        let (Some(event_id), Some(amount), Some(registrant)) =
            (present(event_id), amount, registrant)
        else {
            return Err(ServiceError::validation("Missing required fields"));
        };
        let amount = u64::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| ServiceError::validation("Amount must be a positive integer"))?;

        let order = OrderRequest {
            amount,
            currency: CURRENCY.to_string(),
            receipt: receipt_for(event_id),
            notes: notes_for(event_id, registrant),
        };

        let created = self.gateway.create_order(&order).await.map_err(|e| {
            tracing::error!(error = ?e, receipt = %order.receipt, "gateway rejected order");
            ServiceError::Gateway(ORDER_FAILED.to_string())
        })?;

        Ok(CreatedOrder {
            id: created.id,
            currency: created.currency,
            amount: created.amount,
            receipt: created.receipt.unwrap_or(order.receipt),
        })
    }

    /// Checks the checkout signature before trusting anything the client sent, then confirms the
    /// payment was captured.
    #[instrument(skip(self, signature, registrant))]
    pub async fn verify_payment(
        &self,
        order_id: Option<&str>,
        payment_id: Option<&str>,
        signature: Option<&str>,
        registrant: Option<&Registrant>,
        event_id: Option<&str>,
    ) -> ServiceResult<Verification> {
        let (Some(order_id), Some(payment_id), Some(signature)) =
            (present(order_id), present(payment_id), present(signature))
        else {
            return Err(ServiceError::validation("Missing payment verification data"));
        };

        let expected = sign(self.gateway.key_secret(), order_id, payment_id);
        if !constant_time_cmp(signature, &expected) {
            tracing::warn!(order_id, payment_id, "payment signature mismatch");
            return Err(ServiceError::SignatureInvalid);
        }

        let payment = self.gateway.fetch_payment(payment_id).await.map_err(|e| {
            tracing::error!(error = ?e, payment_id, "unable to fetch payment from gateway");
            ServiceError::Gateway(VERIFY_FAILED.to_string())
        })?;

        if payment.status != CAPTURED {
            return Err(ServiceError::PaymentNotCaptured(payment.status));
        }

        let event_id = present(event_id).unwrap_or("unknown");
        let registration_id = format!("REG_{}_{}", event_id, Utc::now().timestamp_millis());
        // TODO: persist the registration row and send the confirmation email
        tracing::info!(
            registration_id = %registration_id,
            payment_id,
            email = ?registrant.map(|r| r.email.as_str()),
            "payment verified"
        );

        Ok(Verification {
            payment_id: payment_id.to_string(),
            registration_id,
        })
    }
}

/// Lowercase hex HMAC-SHA256 of `order_id|payment_id`.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    let key = Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let message = format!("{order_id}|{payment_id}");

    hex::encode(hmac::sign(&key, message.as_bytes()))
}

fn receipt_for(event_id: &str) -> String {
    format!("event_{}_{}", event_id, Utc::now().timestamp_millis())
}

fn notes_for(event_id: &str, registrant: &Registrant) -> BTreeMap<String, String> {
    BTreeMap::from([
        (String::from("eventId"), event_id.to_string()),
        (String::from("email"), registrant.email.clone()),
        (String::from("name"), registrant.name.clone()),
        (String::from("phone"), registrant.phone.clone()),
        (String::from("institution"), registrant.institution.clone()),
    ])
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
