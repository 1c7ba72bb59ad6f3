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

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::events::GameEvent;
use crate::game::{GameAction, GameState};

pub const ROOM_CODE_LEN: usize = 6;
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// WebSocket close codes (RFC 6455 standard plus application codes).
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INVALID_DATA: u16 = 1007;

    pub const AUTH_FAILED: u16 = 4001;
    pub const AUTH_EXPIRED: u16 = 4002;
    pub const ROOM_NOT_FOUND: u16 = 4003;
    pub const ROOM_ACCESS_DENIED: u16 = 4004;
    pub const AUTH_TIMEOUT: u16 = 4005;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidMessage,
    Unauthenticated,
    AuthFailed,
    AuthExpired,
    AuthTimeout,
    RoomNotFound,
    RoomAccessDenied,
    RoomClosed,
    RoomInGame,
    RoomFull,
    RequestInProgress,
    CodeGenerationFailed,
    NotInRoom,
    NotHost,
    BadPhase,
    IllegalMove,
    RateLimited,
    MessageTooLarge,
    InternalError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Open,
    ReadyToStart,
    InGame,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    NotReady,
    Ready,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Empty,
    Occupied,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatSnapshot {
    pub seat_index: u8,
    pub user_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub ready: ReadyState,
    pub connected: bool,
    pub is_host: bool,
}

impl SeatSnapshot {
    pub fn empty(seat_index: u8) -> Self {
        Self {
            seat_index,
            user_id: None,
            display_name: None,
            ready: ReadyState::NotReady,
            connected: false,
            is_host: false,
        }
    }
}

/// Authoritative room snapshot, sufficient for a full client redraw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub code: String,
    pub status: RoomStatus,
    pub visibility: Visibility,
    pub ruleset_id: String,
    pub max_players: u8,
    pub seats: Vec<SeatSnapshot>,
    pub version: i64,
}

impl RoomSnapshot {
    pub fn seat_of(&self, user_id: Uuid) -> Option<&SeatSnapshot> {
        self.seats.iter().find(|s| s.user_id == Some(user_id))
    }

    pub fn occupied_seats(&self) -> usize {
        self.seats.iter().filter(|s| s.user_id.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticatePayload {
    pub token: String,
    pub room_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub error_code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedPayload {
    pub connection_id: Uuid,
    pub server_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticatedPayload {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub server_id: String,
    pub room: RoomSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PongPayload {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomClosedPayload {
    pub reason: String,
    pub room_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameStartedPayload {
    pub game_state: GameState,
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEventsPayload {
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameStatePayload {
    pub game_state: GameState,
}

/// Message sent from client to server, parsed once at the frame boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate(AuthenticatePayload),
    Ping,
    ToggleReady,
    LeaveRoom,
    StartGame,
    GameAction(GameAction),
}

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedPayload),
    Authenticated(AuthenticatedPayload),
    Pong(PongPayload),
    RoomUpdated(RoomSnapshot),
    RoomClosed(RoomClosedPayload),
    GameStarted(GameStartedPayload),
    GameEvents(GameEventsPayload),
    GameState(GameStatePayload),
    GameError(ErrorPayload),
    Error(ErrorPayload),
}

/// Wire frame: `{type, request_id?, payload?}`. Responses echo `request_id`
/// when the client supplied one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub message: ClientMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerFrame {
    #[serde(flatten)]
    pub message: ServerMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl ServerFrame {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            request_id: None,
        }
    }

    pub fn reply(message: ServerMessage, request_id: Option<Uuid>) -> Self {
        Self {
            message,
            request_id,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<Uuid>) -> Self {
        Self::reply(
            ServerMessage::Error(ErrorPayload {
                error_code: code,
                message: message.into(),
            }),
            request_id,
        )
    }
}

/// Uppercase a candidate room code and check it against the 6-character
/// A–Z/0–9 format. Lookup is case-insensitive; storage is uppercase.
pub fn normalize_room_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    let re = Regex::new(r"^[A-Z0-9]{6}$").unwrap();
    if re.is_match(&code) { Some(code) } else { None }
}

pub fn generate_room_code(rng: &mut impl Rng) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}
