//! Shared [`EphemeralStore`] on Redis, for deployments running several
//! instances. Expiry is native (`SET .. EX`) and `take` is `GETDEL`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::EphemeralStore;
use crate::auth::AuthResult;

/// Prefix applied to every key this crate writes.
const KEY_PREFIX: &str = "keyward:";

/// Redis-backed store over a reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> AuthResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn key_for(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

/// Redis rejects `EX 0`; sub-second TTLs round up to one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> AuthResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key_for(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key_for(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn take(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key_for(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key_for(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
