//! Redis sorted-set backend

use super::{Decrement, ScoreBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;

pub const DEFAULT_REDIS_KEY: &str = "proxies:universal";

/// Decrement and conditional removal as one atomic step.
/// Replies `{state, score}` where state is 0 = missing, 1 = lowered, 2 = removed.
static DECREMENT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if not redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    return {0, 0}
end
local score = tonumber(redis.call('ZINCRBY', KEYS[1], -1, ARGV[1]))
if score <= tonumber(ARGV[2]) then
    redis.call('ZREM', KEYS[1], ARGV[1])
    return {2, math.floor(score)}
end
return {1, math.floor(score)}
"#,
    )
});

/// Connection settings for the Redis backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// When set, used as-is and the discrete fields are ignored.
    pub connection_string: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub key: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key: DEFAULT_REDIS_KEY.to_string(),
        }
    }
}

impl RedisSettings {
    pub fn connection_url(&self) -> Result<String, url::ParseError> {
        if let Some(connection_string) = &self.connection_string {
            return Ok(connection_string.clone());
        }
        let mut url = url::Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))?;
        if let Some(password) = &self.password {
            // Only fails for URLs without a host, which cannot happen here.
            let _ = url.set_password(Some(password));
        }
        Ok(url.to_string())
    }
}

/// Sorted set stored under one Redis key
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    key: String,
}

impl RedisBackend {
    pub async fn connect(settings: &RedisSettings) -> anyhow::Result<Self> {
        let client = redis::Client::open(settings.connection_url()?)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(key = %settings.key, "connected to redis");
        Ok(Self {
            conn,
            key: settings.key.clone(),
        })
    }
}

#[async_trait]
impl ScoreBackend for RedisBackend {
    async fn insert_if_absent(&self, member: &str, score: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn score(&self, member: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(&self.key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(score.map(|s| s as i64))
    }

    async fn decrement(&self, member: &str, floor: i64) -> Result<Decrement, StoreError> {
        let mut conn = self.conn.clone();
        let (state, score): (i64, i64) = DECREMENT_SCRIPT
            .key(&self.key)
            .arg(member)
            .arg(floor)
            .invoke_async(&mut conn)
            .await?;
        Ok(match state {
            0 => Decrement::Missing,
            2 => Decrement::Removed(score),
            _ => Decrement::Lowered(score),
        })
    }

    async fn set_score(&self, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn cardinality(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCARD")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn range_by_score(&self, min: i64, max: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn rev_range_by_rank(&self, start: u64, stop: u64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(&self.key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn scan(&self, cursor: u64, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        let mut conn = self.conn.clone();
        let (next, flat): (u64, Vec<String>) = redis::cmd("ZSCAN")
            .arg(&self.key)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        // ZSCAN interleaves member and score
        let members = flat.into_iter().step_by(2).collect();
        Ok((next, members))
    }
}
