use core::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::util::env::{EnvErr, Var};
use crate::var;

const SCAN_BATCH: usize = 200;

static REDIS_POOL: LazyLock<OnceCell<RedisStore>> = LazyLock::new(OnceCell::new);
pub async fn redis_pool() -> CacheResult<&'static RedisStore> {
    REDIS_POOL
        .get_or_try_init(|| async { RedisStore::new().await })
        .await
}

/// String key-value operations the analysis cache needs.
#[async_trait]
pub trait KvStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;
}

#[derive(Clone)]
pub struct RedisStore {
    pub manager: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    #[instrument]
    pub async fn new() -> CacheResult<Self> {
        Self::connect(var!(Var::RedisUrl).await?).await
    }

    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        tracing::debug!("connecting to redis server");

        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?)
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        let removed = redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    /// Walks the keyspace with `SCAN` so large caches never block the server.
    #[instrument(skip(self))]
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();

        tracing::debug!(count = keys.len(), "retrieved keys from redis");
        Ok(keys)
    }
}

pub type CacheResult<T> = core::result::Result<T, CacheErr>;

#[derive(Debug, Error)]
pub enum CacheErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),

    #[error(transparent)]
    RedisClientError(#[from] redis::RedisError),

    #[error("unable to decode cached value: {0}")]
    Serde(#[from] serde_json::Error),
}
