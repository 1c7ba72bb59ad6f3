// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Typed operations over the shared key-value cache, covering exactly
//! what the session core stores there: presence counters and the
//! denormalized room hashes. Every call is fallible and best-effort:
//! callers log failures and carry on with the repository as the source
//! of truth.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use redis::AsyncCommands;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn incr(&self, key: &str) -> anyhow::Result<i64>;
    async fn decr(&self, key: &str) -> anyhow::Result<i64>;
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> anyhow::Result<()>;
    async fn hash_get_all(&self, key: &str) -> anyhow::Result<HashMap<String, String>>;
}

/// Redis-backed cache client sharing one multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    connection: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let connection = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.context("redis GET failed")
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.context("redis DEL failed")
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.connection.clone();
        conn.exists(key).await.context("redis EXISTS failed")
    }

    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.connection.clone();
        conn.incr(key, 1).await.context("redis INCR failed")
    }

    async fn decr(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.connection.clone();
        conn.decr(key, 1).await.context("redis DECR failed")
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .context("redis HSET failed")
    }

    async fn hash_get_all(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut conn = self.connection.clone();
        conn.hgetall(key).await.context("redis HGETALL failed")
    }
}


#[cfg(test)]
mod tests {
    use super::testsupport::MemoryCache;
    use super::*;

    #[tokio::test]
    async fn counters_increment_and_decrement() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("c").await.unwrap(), 1);
        assert_eq!(cache.incr("c").await.unwrap(), 2);
        assert_eq!(cache.decr("c").await.unwrap(), 1);
        assert_eq!(cache.decr("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hashes_store_fields() {
        let cache = MemoryCache::new();
        cache
            .hash_set(
                "room:1:meta",
                &[
                    ("status".to_string(), "open".to_string()),
                    ("version".to_string(), "3".to_string()),
                ],
            )
            .await
            .unwrap();
        let meta = cache.hash_get_all("room:1:meta").await.unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("status").map(String::as_str), Some("open"));
        assert_eq!(meta.get("version").map(String::as_str), Some("3"));

        cache.delete("room:1:meta").await.unwrap();
        assert!(!cache.exists("room:1:meta").await.unwrap());
    }

    #[tokio::test]
    async fn forced_failures_surface_as_errors() {
        let cache = MemoryCache::new();
        cache
            .fail
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(cache.get("anything").await.is_err());
        assert!(cache.incr("anything").await.is_err());
    }
}
