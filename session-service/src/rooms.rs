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

//! Room lifecycle rules over repository + cache + connection manager.
//! Repository writes for a room run under that room's lock; snapshot
//! broadcasts happen after the lock is released, with the snapshot
//! captured inside the critical section. Cache writes are best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use ludo_common::game::RulesetConfig;
use ludo_common::wire::{
    ErrorCode, RoomClosedPayload, RoomSnapshot, RoomStatus, ServerFrame, ServerMessage,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::connections::{ConnectionInfo, ConnectionManager};
use crate::repo::{CreateRoomOutcome, CreateRoomParams, LeaveOutcome, RepoError, RoomRepository};

#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectOutcome {
    pub room_id: Uuid,
    pub room_closed: bool,
}

pub struct RoomService {
    repo: Arc<dyn RoomRepository>,
    cache: Arc<dyn CacheStore>,
    manager: Arc<ConnectionManager>,
    /// Fallback when a room's stored ruleset config blob is unusable.
    default_ruleset: RulesetConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RoomService {
    pub fn new(
        repo: Arc<dyn RoomRepository>,
        cache: Arc<dyn CacheStore>,
        manager: Arc<ConnectionManager>,
        default_ruleset: RulesetConfig,
    ) -> Self {
        Self {
            repo,
            cache,
            manager,
            default_ruleset,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The per-room lock serializing every state mutation for that room.
    pub async fn room_lock(&self, room_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create_room(
        &self,
        params: &CreateRoomParams,
    ) -> Result<CreateRoomOutcome, RepoError> {
        let outcome = self.repo.find_or_create(params).await?;
        if !outcome.cached {
            if let Ok(snapshot) = self.repo.get_snapshot(outcome.room_id).await {
                self.write_room_cache(&snapshot).await;
            }
        }
        Ok(outcome)
    }

    /// Bind an authenticated user to the room behind a join code: seat
    /// them (idempotent for existing members) and mark the seat
    /// connected. Returns the snapshot to send back and broadcast.
    pub async fn authenticate_user(
        &self,
        user_id: Uuid,
        room_code: &str,
    ) -> Result<(Uuid, RoomSnapshot), RepoError> {
        let resolved = self.repo.resolve_by_code(room_code).await?;
        let room_id = resolved.room_id;

        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        self.repo.join_seat(room_id, user_id).await?;
        let snapshot = self.repo.set_seat_connected(room_id, user_id, true).await?;
        self.write_room_cache(&snapshot).await;
        Ok((room_id, snapshot))
    }

    pub async fn toggle_ready(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<RoomSnapshot, RepoError> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let snapshot = self.repo.toggle_ready(room_id, user_id).await?;
        self.write_room_cache(&snapshot).await;
        info!(
            room_id = %room_id,
            user_id = %user_id,
            status = ?snapshot.status,
            "ready toggled"
        );
        Ok(snapshot)
    }

    pub async fn leave_room(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<LeaveOutcome, RepoError> {
        let outcome = {
            let lock = self.room_lock(room_id).await;
            let _guard = lock.lock().await;
            let outcome = self.repo.leave_seat(room_id, user_id).await?;
            if outcome.room_closed {
                self.clear_room_cache(room_id).await;
            } else {
                self.write_room_cache(&outcome.snapshot).await;
            }
            outcome
        };
        info!(
            room_id = %room_id,
            user_id = %user_id,
            room_closed = outcome.room_closed,
            "user left room"
        );
        Ok(outcome)
    }

    /// Host-only transition to `in_game`. Returns the updated snapshot
    /// and the parsed ruleset config for the game engine.
    pub async fn start_game(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<(RoomSnapshot, RulesetConfig), RepoError> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;

        let snapshot = self.repo.get_snapshot(room_id).await?;
        let seat = snapshot
            .seat_of(user_id)
            .ok_or_else(|| RepoError::new(ErrorCode::NotInRoom, "no seat in this room"))?;
        if !seat.is_host {
            return Err(RepoError::new(
                ErrorCode::NotHost,
                "only the host can start the game",
            ));
        }
        match snapshot.status {
            RoomStatus::ReadyToStart => {}
            RoomStatus::Open => {
                return Err(RepoError::new(
                    ErrorCode::BadPhase,
                    "all players must be ready before starting",
                ));
            }
            RoomStatus::InGame => {
                return Err(RepoError::new(
                    ErrorCode::RoomInGame,
                    "game already in progress",
                ));
            }
            RoomStatus::Closed => {
                return Err(RepoError::new(ErrorCode::RoomClosed, "room is closed"));
            }
        }

        let raw_config = self.repo.get_ruleset_config(room_id).await?;
        let config: RulesetConfig = serde_json::from_value(raw_config)
            .unwrap_or_else(|_| self.default_ruleset.clone());

        let snapshot = self.repo.set_in_game(room_id).await?;
        self.write_room_cache(&snapshot).await;
        info!(room_id = %room_id, host = %user_id, "room transitioned to in_game");
        Ok((snapshot, config))
    }

    pub async fn get_snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError> {
        self.repo.get_snapshot(room_id).await
    }

    /// Socket-gone handling: mark the seat disconnected and un-ready,
    /// close the room when the host abandons the lobby, and tell the
    /// remaining members. Returns what happened so the caller can drop
    /// the game session for a closed room.
    pub async fn handle_disconnect(
        &self,
        connection: &ConnectionInfo,
    ) -> Option<DisconnectOutcome> {
        let user_id = connection.user_id?;
        let room_id = connection.room_id?;

        if self
            .manager
            .user_still_in_room(user_id, room_id, connection.connection_id)
            .await
        {
            // Another socket keeps the seat alive.
            return None;
        }

        let (closed, snapshot) = {
            let lock = self.room_lock(room_id).await;
            let _guard = lock.lock().await;

            let snapshot = match self.repo.set_seat_connected(room_id, user_id, false).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    warn!(
                        room_id = %room_id,
                        user_id = %user_id,
                        error = %error,
                        "failed to mark seat disconnected"
                    );
                    return None;
                }
            };

            let host_abandoned_lobby = snapshot
                .seat_of(user_id)
                .map(|s| s.is_host)
                .unwrap_or(false)
                && matches!(
                    snapshot.status,
                    RoomStatus::Open | RoomStatus::ReadyToStart
                );

            if host_abandoned_lobby {
                if let Err(error) = self.repo.close_room(room_id).await {
                    warn!(room_id = %room_id, error = %error, "failed to close abandoned room");
                }
                self.clear_room_cache(room_id).await;
                (true, snapshot)
            } else {
                self.write_room_cache(&snapshot).await;
                (false, snapshot)
            }
        };

        if closed {
            info!(room_id = %room_id, host = %user_id, "host left the lobby; room closed");
            self.manager
                .send_to_room(
                    room_id,
                    ServerFrame::new(ServerMessage::RoomClosed(RoomClosedPayload {
                        reason: "host_left".to_string(),
                        room_id,
                    })),
                    Some(connection.connection_id),
                )
                .await;
        } else {
            self.manager
                .send_to_room(
                    room_id,
                    ServerFrame::new(ServerMessage::RoomUpdated(snapshot)),
                    Some(connection.connection_id),
                )
                .await;
        }

        Some(DisconnectOutcome {
            room_id,
            room_closed: closed,
        })
    }

    // --- Best-effort cache write-through ---

    fn meta_key(room_id: Uuid) -> String {
        format!("room:{room_id}:meta")
    }

    fn seats_key(room_id: Uuid) -> String {
        format!("room:{room_id}:seats")
    }

    fn enum_str<T: serde::Serialize>(value: &T) -> String {
        serde_json::to_string(value)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string()
    }

    async fn write_room_cache(&self, snapshot: &RoomSnapshot) {
        let meta = vec![
            ("status".to_string(), Self::enum_str(&snapshot.status)),
            (
                "visibility".to_string(),
                Self::enum_str(&snapshot.visibility),
            ),
            ("code".to_string(), snapshot.code.clone()),
            (
                "max_players".to_string(),
                snapshot.max_players.to_string(),
            ),
            ("ruleset_id".to_string(), snapshot.ruleset_id.clone()),
            ("version".to_string(), snapshot.version.to_string()),
        ];
        if let Err(error) = self
            .cache
            .hash_set(&Self::meta_key(snapshot.room_id), &meta)
            .await
        {
            warn!(room_id = %snapshot.room_id, error = %error, "room meta cache write failed");
        }

        let mut seats = Vec::with_capacity(4);
        for index in 0..4u8 {
            let value = snapshot
                .seats
                .iter()
                .find(|s| s.seat_index == index)
                .and_then(|s| serde_json::to_string(s).ok())
                .unwrap_or_else(|| "{}".to_string());
            seats.push((format!("seat:{index}"), value));
        }
        if let Err(error) = self
            .cache
            .hash_set(&Self::seats_key(snapshot.room_id), &seats)
            .await
        {
            warn!(room_id = %snapshot.room_id, error = %error, "room seats cache write failed");
        }
    }

    async fn clear_room_cache(&self, room_id: Uuid) {
        for key in [Self::meta_key(room_id), Self::seats_key(room_id)] {
            if let Err(error) = self.cache.delete(&key).await {
                warn!(room_id = %room_id, key = %key, error = %error, "room cache delete failed");
            }
        }
    }
}
