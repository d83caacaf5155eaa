use core::fmt;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::util::env::{EnvErr, Var};
use crate::var;

/// Order and payment lookups against the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    async fn create_order(&self, order: &OrderRequest) -> GatewayResult<GatewayOrder>;
    async fn fetch_payment(&self, payment_id: &str) -> GatewayResult<GatewayPayment>;

    /// Secret shared with the provider, used to check checkout signatures.
    fn key_secret(&self) -> &str;
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Minor currency units.
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<u64>,
}

#[derive(Clone)]
pub struct RazorpayClient {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl fmt::Debug for RazorpayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RazorpayClient")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RazorpayClient {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        }
    }

    #[instrument]
    pub async fn from_env() -> GatewayResult<Self> {
        Ok(Self::new(
            var!(Var::RazorpayApiUrl).await?,
            var!(Var::RazorpayKeyId).await?,
            var!(Var::RazorpayKeySecret).await?,
        ))
    }

    /// Reads the body as `T` when the provider answered 2xx, otherwise keeps whatever detail the
    /// error body carries.
    async fn parse<T>(res: reqwest::Response) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        let status = res.status();
        if !status.is_success() {
            tracing::error!(code = %status, "non-2xx response from payment gateway");
            return Err(match res.json::<Value>().await {
                Ok(body) => GatewayErr::FetchErrWithBody {
                    code: status.as_u16(),
                    body,
                },
                Err(_) => GatewayErr::FetchErr(status.to_string()),
            });
        }

        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    #[instrument(skip(self, order), fields(receipt = %order.receipt, amount = order.amount))]
    async fn create_order(&self, order: &OrderRequest) -> GatewayResult<GatewayOrder> {
        let res = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(order)
            .send()
            .await?;

        let created = Self::parse::<GatewayOrder>(res).await?;
        tracing::info!(order_id = %created.id, "payment order created");

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> GatewayResult<GatewayPayment> {
        let res = self
            .client
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;

        Self::parse(res).await
    }

    fn key_secret(&self) -> &str {
        &self.key_secret
    }
}

pub type GatewayResult<T> = core::result::Result<T, GatewayErr>;

#[derive(Debug, Error)]
pub enum GatewayErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while parsing environment vars: {0}")]
    EnvError(#[from] EnvErr),

    #[error("error during gateway request: {0}")]
    FetchErr(String),

    #[error("error (status {code}) during gateway request: {body}")]
    FetchErrWithBody { code: u16, body: Value },
}
