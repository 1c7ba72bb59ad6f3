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

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::cache::CacheStore;

/// Distributed per-user connection counter. Cache errors are logged and
/// swallowed; presence is advisory and reconcilable.
pub struct PresenceTracker {
    cache: Arc<dyn CacheStore>,
}

impl PresenceTracker {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    fn key(user_id: Uuid) -> String {
        format!("ws:user:{user_id}:conn_count")
    }

    pub async fn on_connect(&self, user_id: Uuid) {
        if let Err(error) = self.cache.incr(&Self::key(user_id)).await {
            warn!(user_id = %user_id, error = %error, "failed to increment presence counter");
        }
    }

    pub async fn on_disconnect(&self, user_id: Uuid) {
        let key = Self::key(user_id);
        match self.cache.decr(&key).await {
            Ok(count) if count <= 0 => {
                if let Err(error) = self.cache.delete(&key).await {
                    warn!(user_id = %user_id, error = %error, "failed to delete presence counter");
                }
            }
            Ok(_) => {}
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "failed to decrement presence counter");
            }
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        match self.cache.get(&Self::key(user_id)).await {
            Ok(Some(raw)) => raw.parse::<i64>().map(|n| n > 0).unwrap_or(false),
            Ok(None) => false,
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "failed to read presence counter");
                false
            }
        }
    }
}
