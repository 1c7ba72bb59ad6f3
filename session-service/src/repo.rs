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

//! Persistent room and seat state behind the PostgREST interface.
//!
//! The `find_or_create_room` RPC owns the creation transaction (code
//! generation, idempotency record, seat rows). Everything else reads the
//! `rooms`/`room_seats` tables directly and writes with optimistic
//! locking on the room `version` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ludo_common::wire::{
    ErrorCode, ReadyState, RoomSnapshot, RoomStatus, SeatSnapshot, SeatStatus, Visibility,
    normalize_room_code,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const VERSION_CONFLICT_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RepoError {
    pub code: ErrorCode,
    pub message: String,
}

impl RepoError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoomNotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RepoError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomRow {
    pub id: Uuid,
    pub code: String,
    pub owner_user_id: Uuid,
    pub status: RoomStatus,
    pub visibility: Visibility,
    pub max_players: u8,
    pub ruleset_id: String,
    pub ruleset_config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatRow {
    pub room_id: Uuid,
    pub seat_index: u8,
    pub user_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub is_host: bool,
    pub ready: ReadyState,
    pub connected: bool,
    pub status: SeatStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRoomParams {
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub max_players: u8,
    pub visibility: Visibility,
    pub ruleset_id: String,
    pub ruleset_config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRoomOutcome {
    pub room_id: Uuid,
    pub code: String,
    pub seat_index: u8,
    pub is_host: bool,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub seat_index: u8,
    pub snapshot: RoomSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub snapshot: RoomSnapshot,
    pub room_closed: bool,
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_or_create(&self, params: &CreateRoomParams)
    -> Result<CreateRoomOutcome, RepoError>;
    async fn resolve_by_code(&self, code: &str) -> Result<RoomSnapshot, RepoError>;
    async fn join_seat(&self, room_id: Uuid, user_id: Uuid) -> Result<JoinOutcome, RepoError>;
    async fn toggle_ready(&self, room_id: Uuid, user_id: Uuid)
    -> Result<RoomSnapshot, RepoError>;
    async fn leave_seat(&self, room_id: Uuid, user_id: Uuid) -> Result<LeaveOutcome, RepoError>;
    async fn close_room(&self, room_id: Uuid) -> Result<(), RepoError>;
    async fn set_in_game(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError>;
    async fn set_seat_connected(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        connected: bool,
    ) -> Result<RoomSnapshot, RepoError>;
    async fn get_snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError>;
    async fn get_ruleset_config(&self, room_id: Uuid) -> Result<serde_json::Value, RepoError>;
}

// --- Pure lifecycle rules, shared by the PostgREST impl and test fakes ---

pub fn lowest_empty_seat(seats: &[SeatRow]) -> Option<u8> {
    seats
        .iter()
        .filter(|s| s.user_id.is_none())
        .map(|s| s.seat_index)
        .min()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinPlan {
    /// The user is already seated here: idempotent rejoin.
    Existing(u8),
    Take(u8),
}

pub fn plan_join(room: &RoomRow, seats: &[SeatRow], user_id: Uuid) -> Result<JoinPlan, RepoError> {
    if room.status == RoomStatus::Closed {
        return Err(RepoError::new(ErrorCode::RoomClosed, "room is closed"));
    }
    if let Some(seat) = seats.iter().find(|s| s.user_id == Some(user_id)) {
        return Ok(JoinPlan::Existing(seat.seat_index));
    }
    if room.status == RoomStatus::InGame {
        return Err(RepoError::new(
            ErrorCode::RoomInGame,
            "game already in progress",
        ));
    }
    lowest_empty_seat(seats)
        .map(JoinPlan::Take)
        .ok_or_else(|| RepoError::new(ErrorCode::RoomFull, "room is full"))
}

/// Room status after the given seat set changed, for rooms still in the
/// lobby: `ready_to_start` iff at least two players are seated and every
/// seated player is ready.
pub fn lobby_status_for(seats: &[SeatRow], current: RoomStatus) -> RoomStatus {
    match current {
        RoomStatus::Open | RoomStatus::ReadyToStart => {
            let occupied: Vec<&SeatRow> = seats.iter().filter(|s| s.user_id.is_some()).collect();
            if occupied.len() >= 2 && occupied.iter().all(|s| s.ready == ReadyState::Ready) {
                RoomStatus::ReadyToStart
            } else {
                RoomStatus::Open
            }
        }
        other => other,
    }
}

pub fn snapshot_from(room: &RoomRow, seats: &[SeatRow]) -> RoomSnapshot {
    let mut sorted: Vec<&SeatRow> = seats.iter().collect();
    sorted.sort_by_key(|s| s.seat_index);
    RoomSnapshot {
        room_id: room.id,
        code: room.code.clone(),
        status: room.status,
        visibility: room.visibility,
        ruleset_id: room.ruleset_id.clone(),
        max_players: room.max_players,
        seats: sorted
            .into_iter()
            .map(|s| SeatSnapshot {
                seat_index: s.seat_index,
                user_id: s.user_id,
                display_name: s.display_name.clone(),
                ready: s.ready,
                connected: s.connected,
                is_host: s.is_host,
            })
            .collect(),
        version: room.version,
    }
}

fn cleared_seat_patch(now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "user_id": null,
        "display_name": null,
        "is_host": false,
        "ready": "not_ready",
        "connected": false,
        "status": "left",
        "left_at": now,
    })
}

// --- PostgREST-backed implementation ---

#[derive(Debug, Deserialize)]
struct RpcRoomData {
    room_id: Uuid,
    code: String,
    seat_index: u8,
    is_host: bool,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    success: bool,
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<RpcRoomData>,
}

pub struct PostgrestRoomRepository {
    client: reqwest::Client,
    rest_url: String,
    anon_key: String,
}

impl PostgrestRoomRepository {
    pub fn new(rest_url: String, anon_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url,
            anon_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn fetch_rows<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, RepoError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| RepoError::internal(format!("repository request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::internal(format!(
                "repository returned {status}: {body}"
            )));
        }
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| RepoError::internal(format!("invalid repository response: {e}")))
    }

    async fn fetch_room(&self, room_id: Uuid) -> Result<RoomRow, RepoError> {
        self.fetch_rows::<RoomRow>(&format!("rooms?id=eq.{room_id}&limit=1"))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::not_found(format!("room {room_id} not found")))
    }

    async fn fetch_room_by_code(&self, code: &str) -> Result<RoomRow, RepoError> {
        self.fetch_rows::<RoomRow>(&format!("rooms?code=eq.{code}&status=neq.closed&limit=1"))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::not_found(format!("no open room with code {code}")))
    }

    async fn fetch_seats(&self, room_id: Uuid) -> Result<Vec<SeatRow>, RepoError> {
        self.fetch_rows::<SeatRow>(&format!(
            "room_seats?room_id=eq.{room_id}&order=seat_index.asc"
        ))
        .await
    }

    /// Compare-and-swap write on the room row: applies `patch` and bumps
    /// `version`, guarded by `WHERE version = expected`. Returns false on
    /// a lost race.
    async fn cas_room(
        &self,
        room_id: Uuid,
        expected_version: i64,
        patch: serde_json::Value,
    ) -> Result<bool, RepoError> {
        let mut body = patch;
        body["version"] = json!(expected_version + 1);
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("rooms?id=eq.{room_id}&version=eq.{expected_version}"),
            )
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| RepoError::internal(format!("repository request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RepoError::internal(format!(
                "repository returned {status}: {text}"
            )));
        }
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RepoError::internal(format!("invalid repository response: {e}")))?;
        Ok(!rows.is_empty())
    }

    async fn patch_seat(
        &self,
        room_id: Uuid,
        seat_index: u8,
        patch: serde_json::Value,
    ) -> Result<(), RepoError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("room_seats?room_id=eq.{room_id}&seat_index=eq.{seat_index}"),
            )
            .json(&patch)
            .send()
            .await
            .map_err(|e| RepoError::internal(format!("repository request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RepoError::internal(format!(
                "repository returned {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError> {
        let room = self.fetch_room(room_id).await?;
        let seats = self.fetch_seats(room_id).await?;
        Ok(snapshot_from(&room, &seats))
    }
}

#[async_trait]
impl RoomRepository for PostgrestRoomRepository {
    async fn find_or_create(
        &self,
        params: &CreateRoomParams,
    ) -> Result<CreateRoomOutcome, RepoError> {
        let response = self
            .request(reqwest::Method::POST, "rpc/find_or_create_room")
            .json(&json!({
                "p_user_id": params.user_id,
                "p_request_id": params.request_id,
                "p_max_players": params.max_players,
                "p_visibility": params.visibility,
                "p_ruleset_id": params.ruleset_id,
                "p_ruleset_config": params.ruleset_config,
            }))
            .send()
            .await
            .map_err(|e| RepoError::internal(format!("find_or_create_room failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::internal(format!(
                "find_or_create_room returned {status}: {body}"
            )));
        }
        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| RepoError::internal(format!("invalid find_or_create_room reply: {e}")))?;

        if !envelope.success {
            let code = match envelope.error.as_deref() {
                Some("REQUEST_IN_PROGRESS") => ErrorCode::RequestInProgress,
                Some("CODE_GENERATION_FAILED") => ErrorCode::CodeGenerationFailed,
                _ => ErrorCode::InternalError,
            };
            return Err(RepoError::new(
                code,
                envelope
                    .message
                    .unwrap_or_else(|| "room creation failed".to_string()),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| RepoError::internal("find_or_create_room reply had no data"))?;
        Ok(CreateRoomOutcome {
            room_id: data.room_id,
            code: data.code,
            seat_index: data.seat_index,
            is_host: data.is_host,
            cached: envelope.cached,
        })
    }

    async fn resolve_by_code(&self, code: &str) -> Result<RoomSnapshot, RepoError> {
        let code = normalize_room_code(code)
            .ok_or_else(|| RepoError::new(ErrorCode::ValidationError, "malformed room code"))?;
        let room = self.fetch_room_by_code(&code).await?;
        let seats = self.fetch_seats(room.id).await?;
        Ok(snapshot_from(&room, &seats))
    }

    async fn join_seat(&self, room_id: Uuid, user_id: Uuid) -> Result<JoinOutcome, RepoError> {
        for _ in 0..VERSION_CONFLICT_RETRIES {
            let room = self.fetch_room(room_id).await?;
            let seats = self.fetch_seats(room_id).await?;
            match plan_join(&room, &seats, user_id)? {
                JoinPlan::Existing(seat_index) => {
                    return Ok(JoinOutcome {
                        seat_index,
                        snapshot: snapshot_from(&room, &seats),
                    });
                }
                JoinPlan::Take(seat_index) => {
                    if self.cas_room(room_id, room.version, json!({})).await? {
                        self.patch_seat(
                            room_id,
                            seat_index,
                            json!({
                                "user_id": user_id,
                                "is_host": false,
                                "ready": "not_ready",
                                "connected": false,
                                "status": "occupied",
                                "joined_at": Utc::now(),
                                "left_at": null,
                            }),
                        )
                        .await?;
                        return Ok(JoinOutcome {
                            seat_index,
                            snapshot: self.snapshot(room_id).await?,
                        });
                    }
                }
            }
        }
        Err(RepoError::internal("join lost the version race repeatedly"))
    }

    async fn toggle_ready(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<RoomSnapshot, RepoError> {
        for _ in 0..VERSION_CONFLICT_RETRIES {
            let room = self.fetch_room(room_id).await?;
            match room.status {
                RoomStatus::Closed => {
                    return Err(RepoError::new(ErrorCode::RoomClosed, "room is closed"));
                }
                RoomStatus::InGame => {
                    return Err(RepoError::new(
                        ErrorCode::RoomInGame,
                        "game already in progress",
                    ));
                }
                _ => {}
            }
            let mut seats = self.fetch_seats(room_id).await?;
            let seat = seats
                .iter_mut()
                .find(|s| s.user_id == Some(user_id))
                .ok_or_else(|| RepoError::new(ErrorCode::NotInRoom, "no seat in this room"))?;
            let new_ready = match seat.ready {
                ReadyState::Ready => ReadyState::NotReady,
                ReadyState::NotReady => ReadyState::Ready,
            };
            seat.ready = new_ready;
            let seat_index = seat.seat_index;
            let new_status = lobby_status_for(&seats, room.status);

            if self
                .cas_room(room_id, room.version, json!({"status": new_status}))
                .await?
            {
                self.patch_seat(room_id, seat_index, json!({"ready": new_ready}))
                    .await?;
                return self.snapshot(room_id).await;
            }
        }
        Err(RepoError::internal(
            "toggle_ready lost the version race repeatedly",
        ))
    }

    async fn leave_seat(&self, room_id: Uuid, user_id: Uuid) -> Result<LeaveOutcome, RepoError> {
        for _ in 0..VERSION_CONFLICT_RETRIES {
            let room = self.fetch_room(room_id).await?;
            if room.status == RoomStatus::Closed {
                return Err(RepoError::new(ErrorCode::RoomClosed, "room is closed"));
            }
            let seats = self.fetch_seats(room_id).await?;
            let seat = seats
                .iter()
                .find(|s| s.user_id == Some(user_id))
                .ok_or_else(|| RepoError::new(ErrorCode::NotInRoom, "no seat in this room"))?;
            let seat_index = seat.seat_index;
            let now = Utc::now();

            if seat.is_host && room.status != RoomStatus::InGame {
                if self
                    .cas_room(
                        room_id,
                        room.version,
                        json!({"status": "closed", "closed_at": now}),
                    )
                    .await?
                {
                    self.patch_seat(room_id, seat_index, cleared_seat_patch(now))
                        .await?;
                    return Ok(LeaveOutcome {
                        snapshot: self.snapshot(room_id).await?,
                        room_closed: true,
                    });
                }
                continue;
            }

            let remaining: Vec<SeatRow> = seats
                .iter()
                .filter(|s| s.seat_index != seat_index)
                .cloned()
                .collect();
            let new_status = lobby_status_for(&remaining, room.status);
            if self
                .cas_room(room_id, room.version, json!({"status": new_status}))
                .await?
            {
                self.patch_seat(room_id, seat_index, cleared_seat_patch(now))
                    .await?;
                return Ok(LeaveOutcome {
                    snapshot: self.snapshot(room_id).await?,
                    room_closed: false,
                });
            }
        }
        Err(RepoError::internal(
            "leave_seat lost the version race repeatedly",
        ))
    }

    async fn close_room(&self, room_id: Uuid) -> Result<(), RepoError> {
        let room = self.fetch_room(room_id).await?;
        if room.status == RoomStatus::Closed {
            return Ok(());
        }
        if !self
            .cas_room(
                room_id,
                room.version,
                json!({"status": "closed", "closed_at": Utc::now()}),
            )
            .await?
        {
            warn!(room_id = %room_id, "close_room lost a version race; retrying once");
            let room = self.fetch_room(room_id).await?;
            if room.status != RoomStatus::Closed {
                self.cas_room(
                    room_id,
                    room.version,
                    json!({"status": "closed", "closed_at": Utc::now()}),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn set_in_game(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError> {
        for _ in 0..VERSION_CONFLICT_RETRIES {
            let room = self.fetch_room(room_id).await?;
            if self
                .cas_room(
                    room_id,
                    room.version,
                    json!({"status": "in_game", "started_at": Utc::now()}),
                )
                .await?
            {
                return self.snapshot(room_id).await;
            }
        }
        Err(RepoError::internal(
            "set_in_game lost the version race repeatedly",
        ))
    }

    async fn set_seat_connected(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        connected: bool,
    ) -> Result<RoomSnapshot, RepoError> {
        for _ in 0..VERSION_CONFLICT_RETRIES {
            let room = self.fetch_room(room_id).await?;
            let mut seats = self.fetch_seats(room_id).await?;
            let seat = seats
                .iter_mut()
                .find(|s| s.user_id == Some(user_id))
                .ok_or_else(|| RepoError::new(ErrorCode::NotInRoom, "no seat in this room"))?;
            seat.connected = connected;
            // A dropped socket also clears readiness.
            if !connected {
                seat.ready = ReadyState::NotReady;
            }
            let seat_index = seat.seat_index;
            let ready = seat.ready;
            let new_status = lobby_status_for(&seats, room.status);

            if self
                .cas_room(room_id, room.version, json!({"status": new_status}))
                .await?
            {
                self.patch_seat(
                    room_id,
                    seat_index,
                    json!({"connected": connected, "ready": ready}),
                )
                .await?;
                return self.snapshot(room_id).await;
            }
        }
        Err(RepoError::internal(
            "set_seat_connected lost the version race repeatedly",
        ))
    }

    async fn get_snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, RepoError> {
        self.snapshot(room_id).await
    }

    async fn get_ruleset_config(&self, room_id: Uuid) -> Result<serde_json::Value, RepoError> {
        Ok(self.fetch_room(room_id).await?.ruleset_config)
    }
}


#[cfg(test)]
mod tests {
    use super::testsupport::MemoryRoomRepository;
    use super::*;

    fn params(user_id: Uuid, request_id: Uuid) -> CreateRoomParams {
        CreateRoomParams {
            user_id,
            request_id,
            max_players: 4,
            visibility: Visibility::Private,
            ruleset_id: "classic".to_string(),
            ruleset_config: serde_json::json!({}),
        }
    }

    fn seat(seat_index: u8, user_id: Option<Uuid>, ready: ReadyState) -> SeatRow {
        SeatRow {
            room_id: Uuid::new_v4(),
            seat_index,
            user_id,
            display_name: None,
            is_host: seat_index == 0,
            ready,
            connected: false,
            status: if user_id.is_some() {
                SeatStatus::Occupied
            } else {
                SeatStatus::Empty
            },
            joined_at: None,
            left_at: None,
        }
    }

    #[test]
    fn lowest_empty_seat_prefers_the_smallest_index() {
        let seats = vec![
            seat(0, Some(Uuid::new_v4()), ReadyState::NotReady),
            seat(1, None, ReadyState::NotReady),
            seat(2, Some(Uuid::new_v4()), ReadyState::NotReady),
            seat(3, None, ReadyState::NotReady),
        ];
        assert_eq!(lowest_empty_seat(&seats), Some(1));
    }

    #[test]
    fn lobby_status_requires_two_ready_players() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let one_ready = vec![
            seat(0, Some(a), ReadyState::Ready),
            seat(1, None, ReadyState::NotReady),
        ];
        assert_eq!(
            lobby_status_for(&one_ready, RoomStatus::Open),
            RoomStatus::Open
        );

        let both_ready = vec![
            seat(0, Some(a), ReadyState::Ready),
            seat(1, Some(b), ReadyState::Ready),
        ];
        assert_eq!(
            lobby_status_for(&both_ready, RoomStatus::Open),
            RoomStatus::ReadyToStart
        );

        let one_unready = vec![
            seat(0, Some(a), ReadyState::Ready),
            seat(1, Some(b), ReadyState::NotReady),
        ];
        assert_eq!(
            lobby_status_for(&one_unready, RoomStatus::ReadyToStart),
            RoomStatus::Open
        );
    }

    #[test]
    fn lobby_status_never_touches_closed_or_in_game_rooms() {
        let seats = vec![seat(0, Some(Uuid::new_v4()), ReadyState::Ready)];
        assert_eq!(
            lobby_status_for(&seats, RoomStatus::InGame),
            RoomStatus::InGame
        );
        assert_eq!(
            lobby_status_for(&seats, RoomStatus::Closed),
            RoomStatus::Closed
        );
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_request_id() {
        let repo = MemoryRoomRepository::new();
        let user = Uuid::new_v4();
        let request = Uuid::new_v4();

        let first = repo.find_or_create(&params(user, request)).await.unwrap();
        assert!(!first.cached);
        assert!(first.is_host);
        assert_eq!(first.seat_index, 0);

        let second = repo.find_or_create(&params(user, request)).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.room_id, first.room_id);
        assert_eq!(second.code, first.code);
        assert_eq!(repo.room_count(), 1);
    }

    #[tokio::test]
    async fn find_or_create_returns_the_owners_existing_open_room() {
        let repo = MemoryRoomRepository::new();
        let user = Uuid::new_v4();

        let first = repo
            .find_or_create(&params(user, Uuid::new_v4()))
            .await
            .unwrap();
        let second = repo
            .find_or_create(&params(user, Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(second.room_id, first.room_id);
        assert_eq!(repo.room_count(), 1);
    }

    #[tokio::test]
    async fn find_or_create_reports_requests_still_in_progress() {
        let repo = MemoryRoomRepository::new();
        let user = Uuid::new_v4();
        let request = Uuid::new_v4();
        repo.poison_request(request, user);

        let err = repo.find_or_create(&params(user, request)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestInProgress);
    }

    #[tokio::test]
    async fn created_rooms_have_host_on_seat_zero_and_empty_rest() {
        let repo = MemoryRoomRepository::new();
        let user = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(user, Uuid::new_v4()))
            .await
            .unwrap();

        let snapshot = repo.get_snapshot(outcome.room_id).await.unwrap();
        assert_eq!(snapshot.seats.len(), 4);
        assert_eq!(snapshot.seats[0].user_id, Some(user));
        assert!(snapshot.seats[0].is_host);
        for seat in &snapshot.seats[1..] {
            assert!(seat.user_id.is_none());
            assert!(!seat.is_host);
        }
        assert_eq!(snapshot.status, RoomStatus::Open);
    }

    #[tokio::test]
    async fn resolve_by_code_is_case_insensitive() {
        let repo = MemoryRoomRepository::new();
        let user = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(user, Uuid::new_v4()))
            .await
            .unwrap();

        let snapshot = repo
            .resolve_by_code(&outcome.code.to_lowercase())
            .await
            .unwrap();
        assert_eq!(snapshot.room_id, outcome.room_id);
        assert_eq!(snapshot.code, outcome.code);
    }

    #[tokio::test]
    async fn join_takes_the_lowest_empty_seat_and_bumps_version() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let before = repo.get_snapshot(outcome.room_id).await.unwrap();

        let b = Uuid::new_v4();
        let join_b = repo.join_seat(outcome.room_id, b).await.unwrap();
        assert_eq!(join_b.seat_index, 1);
        assert!(join_b.snapshot.version > before.version);

        let c = Uuid::new_v4();
        let join_c = repo.join_seat(outcome.room_id, c).await.unwrap();
        assert_eq!(join_c.seat_index, 2);
    }

    #[tokio::test]
    async fn rejoining_returns_the_same_seat_without_a_new_version() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let b = Uuid::new_v4();

        let first = repo.join_seat(outcome.room_id, b).await.unwrap();
        let second = repo.join_seat(outcome.room_id, b).await.unwrap();
        assert_eq!(first.seat_index, second.seat_index);
        assert_eq!(first.snapshot.version, second.snapshot.version);
        assert_eq!(second.snapshot.occupied_seats(), 2);
    }

    #[tokio::test]
    async fn a_full_room_rejects_new_joiners() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let mut create = params(host, Uuid::new_v4());
        create.max_players = 2;
        let outcome = repo.find_or_create(&create).await.unwrap();

        repo.join_seat(outcome.room_id, Uuid::new_v4()).await.unwrap();
        let err = repo
            .join_seat(outcome.room_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RoomFull);
    }

    #[tokio::test]
    async fn in_game_rooms_admit_only_existing_members() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let member = Uuid::new_v4();
        repo.join_seat(outcome.room_id, member).await.unwrap();
        repo.set_in_game(outcome.room_id).await.unwrap();

        let rejoin = repo.join_seat(outcome.room_id, member).await.unwrap();
        assert_eq!(rejoin.seat_index, 1);

        let err = repo
            .join_seat(outcome.room_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RoomInGame);
    }

    #[tokio::test]
    async fn ready_toggles_drive_the_room_status() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let b = Uuid::new_v4();
        repo.join_seat(outcome.room_id, b).await.unwrap();

        let snapshot = repo.toggle_ready(outcome.room_id, host).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Open);

        let snapshot = repo.toggle_ready(outcome.room_id, b).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::ReadyToStart);

        // Flipping back reopens the lobby.
        let snapshot = repo.toggle_ready(outcome.room_id, host).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Open);
    }

    #[tokio::test]
    async fn host_leaving_the_lobby_closes_the_room() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        repo.join_seat(outcome.room_id, Uuid::new_v4()).await.unwrap();

        let leave = repo.leave_seat(outcome.room_id, host).await.unwrap();
        assert!(leave.room_closed);

        let snapshot = repo.get_snapshot(outcome.room_id).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Closed);
        // Closed rooms are no longer resolvable by code.
        let err = repo.resolve_by_code(&outcome.code).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RoomNotFound);
    }

    #[tokio::test]
    async fn non_host_leaving_vacates_the_seat() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let b = Uuid::new_v4();
        repo.join_seat(outcome.room_id, b).await.unwrap();

        let leave = repo.leave_seat(outcome.room_id, b).await.unwrap();
        assert!(!leave.room_closed);
        let snapshot = leave.snapshot;
        assert_eq!(snapshot.status, RoomStatus::Open);
        assert!(snapshot.seats[1].user_id.is_none());
        assert!(snapshot.seats[0].is_host);

        // The vacated seat is reusable.
        let c = Uuid::new_v4();
        let join = repo.join_seat(outcome.room_id, c).await.unwrap();
        assert_eq!(join.seat_index, 1);
    }

    #[tokio::test]
    async fn leaving_drops_ready_to_start_when_a_ready_player_goes() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        repo.join_seat(outcome.room_id, b).await.unwrap();
        repo.join_seat(outcome.room_id, c).await.unwrap();
        repo.toggle_ready(outcome.room_id, host).await.unwrap();
        repo.toggle_ready(outcome.room_id, b).await.unwrap();
        let snapshot = repo.toggle_ready(outcome.room_id, c).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::ReadyToStart);

        let leave = repo.leave_seat(outcome.room_id, c).await.unwrap();
        assert_eq!(leave.snapshot.status, RoomStatus::ReadyToStart);
        // c was ready when they left, so the remaining two stay ready.
        // A disconnect-style ready reset is a separate operation.
        let snapshot = repo
            .set_seat_connected(outcome.room_id, b, false)
            .await
            .unwrap();
        assert_eq!(snapshot.status, RoomStatus::Open);
        assert_eq!(snapshot.seats[1].ready, ReadyState::NotReady);
    }

    #[tokio::test]
    async fn disconnect_resets_ready_and_connected() {
        let repo = MemoryRoomRepository::new();
        let host = Uuid::new_v4();
        let outcome = repo
            .find_or_create(&params(host, Uuid::new_v4()))
            .await
            .unwrap();
        repo.set_seat_connected(outcome.room_id, host, true)
            .await
            .unwrap();
        let snapshot = repo.get_snapshot(outcome.room_id).await.unwrap();
        assert!(snapshot.seats[0].connected);

        let snapshot = repo
            .set_seat_connected(outcome.room_id, host, false)
            .await
            .unwrap();
        assert!(!snapshot.seats[0].connected);
        assert_eq!(snapshot.seats[0].ready, ReadyState::NotReady);
    }
}
