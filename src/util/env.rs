//! Process configuration, read once from the environment (and an optional `.env` file).
//!
//! Every value is kept as a string and parsed at the point of use, so a bad value only fails the
//! component that needs it.

use std::sync::LazyLock;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::RedisUrl => &vars.redis_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
        Var::AiWebhookUrl => &vars.ai_webhook_url,
        Var::RazorpayKeyId => &vars.razorpay_key_id,
        Var::RazorpayKeySecret => &vars.razorpay_key_secret,
        Var::RazorpayApiUrl => &vars.razorpay_api_url,
        Var::SpeechEnabled => &vars.speech_enabled,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub database_url: String,
    pub redis_url: String,
    #[serde(default = "default_port")]
    pub server_api_port: String,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
    pub ai_webhook_url: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    #[serde(default = "default_razorpay_api_url")]
    pub razorpay_api_url: String,
    #[serde(default)]
    pub speech_enabled: String,
    /// Empty disables OTLP export; logs still go to stdout.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: String,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        from_env::<Env>()
    }
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    RedisUrl,
    ServerApiPort,
    CorsAllowOrigins,
    AiWebhookUrl,
    RazorpayKeyId,
    RazorpayKeySecret,
    RazorpayApiUrl,
    SpeechEnabled,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

fn default_port() -> String {
    String::from("3000")
}

fn default_cors() -> String {
    String::from("*")
}

fn default_razorpay_api_url() -> String {
    String::from("https://api.razorpay.com/v1")
}

fn default_service_name() -> String {
    String::from("mydebate-api")
}

fn default_tracer_name() -> String {
    String::from("mydebate-tracer")
}

/// Loads `.env` (if one exists) into the process environment, then deserializes `T` from it.
pub fn from_env<T>() -> EnvResult<T>
where
    T: DeserializeOwned,
{
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        return Err(EnvErr::Dotenvy(e));
    }

    from_iter(std::env::vars())
}

pub fn from_iter<Iter, T>(iter: Iter) -> EnvResult<T>
where
    T: DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let vars: Map<String, Value> = iter
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    Ok(serde_json::from_value(Value::Object(vars))?)
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error("env deserialization error: {0}")]
    DeserializationError(#[from] serde_json::Error),
}
