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

//! Routes decoded client frames to their handlers and turns the result
//! into network effects: an optional direct reply plus an optional room
//! broadcast excluding the sender. Only `ping` and `authenticate` accept
//! unauthenticated connections.

use std::sync::Arc;

use chrono::Utc;
use ludo_common::game::PlayerSetup;
use ludo_common::wire::{
    AuthenticatePayload, AuthenticatedPayload, ClientFrame, ClientMessage, ErrorCode,
    ErrorPayload, GameEventsPayload, GameStartedPayload, GameStatePayload, PongPayload,
    RoomClosedPayload, RoomStatus, ServerFrame, ServerMessage,
};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::TokenValidator;
use crate::connections::{ConnectionInfo, ConnectionManager};
use crate::presence::PresenceTracker;
use crate::repo::RepoError;
use crate::rooms::RoomService;
use crate::session::GameSessions;

#[derive(Debug)]
pub struct HandlerResult {
    pub success: bool,
    pub response: Option<ServerFrame>,
    pub broadcast: Option<ServerFrame>,
    pub room_id: Option<Uuid>,
}

impl HandlerResult {
    pub fn reply(message: ServerMessage, request_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            response: Some(ServerFrame::reply(message, request_id)),
            broadcast: None,
            room_id: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<Uuid>) -> Self {
        Self {
            success: false,
            response: Some(ServerFrame::error(code, message, request_id)),
            broadcast: None,
            room_id: None,
        }
    }

    fn game_error(
        code: ErrorCode,
        message: impl Into<String>,
        request_id: Option<Uuid>,
    ) -> Self {
        Self {
            success: false,
            response: Some(ServerFrame::reply(
                ServerMessage::GameError(ErrorPayload {
                    error_code: code,
                    message: message.into(),
                }),
                request_id,
            )),
            broadcast: None,
            room_id: None,
        }
    }

    fn with_broadcast(mut self, room_id: Uuid, message: ServerMessage) -> Self {
        self.broadcast = Some(ServerFrame::new(message));
        self.room_id = Some(room_id);
        self
    }
}

fn repo_error(error: RepoError, request_id: Option<Uuid>) -> HandlerResult {
    HandlerResult::error(error.code, error.message, request_id)
}

pub struct Dispatcher {
    manager: Arc<ConnectionManager>,
    rooms: Arc<RoomService>,
    sessions: Arc<GameSessions>,
    validator: Arc<dyn TokenValidator>,
    presence: Arc<PresenceTracker>,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<ConnectionManager>,
        rooms: Arc<RoomService>,
        sessions: Arc<GameSessions>,
        validator: Arc<dyn TokenValidator>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            manager,
            rooms,
            sessions,
            validator,
            presence,
        }
    }

    /// Route one decoded frame. The caller delivers `response` to the
    /// originating connection and `broadcast` to the rest of the room.
    pub async fn dispatch(&self, connection_id: Uuid, frame: ClientFrame) -> HandlerResult {
        let request_id = frame.request_id;
        match frame.message {
            ClientMessage::Ping => self.handle_ping(connection_id, request_id).await,
            ClientMessage::Authenticate(payload) => {
                self.handle_authenticate(connection_id, payload, request_id)
                    .await
            }
            ClientMessage::ToggleReady => {
                self.handle_toggle_ready(connection_id, request_id).await
            }
            ClientMessage::LeaveRoom => self.handle_leave_room(connection_id, request_id).await,
            ClientMessage::StartGame => self.handle_start_game(connection_id, request_id).await,
            ClientMessage::GameAction(action) => {
                self.handle_game_action(connection_id, action, request_id)
                    .await
            }
        }
    }

    /// Every handler except `ping` and `authenticate` runs behind this.
    async fn authenticated_member(
        &self,
        connection_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<(ConnectionInfo, Uuid, Uuid), HandlerResult> {
        let Some(info) = self.manager.get(connection_id).await else {
            return Err(HandlerResult::error(
                ErrorCode::Unauthenticated,
                "connection is not registered",
                request_id,
            ));
        };
        let (Some(user_id), true) = (info.user_id, info.authenticated) else {
            return Err(HandlerResult::error(
                ErrorCode::Unauthenticated,
                "authenticate first",
                request_id,
            ));
        };
        let Some(room_id) = info.room_id else {
            return Err(HandlerResult::error(
                ErrorCode::NotInRoom,
                "you are not in a room",
                request_id,
            ));
        };
        Ok((info, user_id, room_id))
    }

    async fn handle_ping(&self, connection_id: Uuid, request_id: Option<Uuid>) -> HandlerResult {
        self.manager.touch(connection_id).await;
        HandlerResult::reply(
            ServerMessage::Pong(PongPayload {
                server_time: Utc::now(),
            }),
            request_id,
        )
    }

    async fn handle_authenticate(
        &self,
        connection_id: Uuid,
        payload: AuthenticatePayload,
        request_id: Option<Uuid>,
    ) -> HandlerResult {
        let Some(info) = self.manager.get(connection_id).await else {
            return HandlerResult::error(
                ErrorCode::InternalError,
                "connection is not registered",
                request_id,
            );
        };
        if info.authenticated {
            return HandlerResult::error(
                ErrorCode::ValidationError,
                "connection is already authenticated",
                request_id,
            );
        }

        let claims = match self.validator.validate(&payload.token).await {
            Ok(claims) => claims,
            Err(error) => {
                warn!(
                    connection_id = %connection_id,
                    error = %error,
                    "websocket authentication failed"
                );
                return HandlerResult::error(error.code(), error.to_string(), request_id);
            }
        };

        let (room_id, snapshot) = match self
            .rooms
            .authenticate_user(claims.user_id, &payload.room_code)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    connection_id = %connection_id,
                    user_id = %claims.user_id,
                    room_code = %payload.room_code,
                    error = %error,
                    "room binding failed"
                );
                return repo_error(error, request_id);
            }
        };

        self.manager
            .authenticate(connection_id, claims.user_id, room_id)
            .await;
        self.presence.on_connect(claims.user_id).await;
        info!(
            connection_id = %connection_id,
            user_id = %claims.user_id,
            room_id = %room_id,
            "connection authenticated"
        );

        // A member joining a running game gets the full game state for a
        // redraw; lobby history is never replayed.
        if snapshot.status == RoomStatus::InGame {
            if let Some(game_state) = self.sessions.snapshot(room_id).await {
                self.manager
                    .send_to_connection(
                        connection_id,
                        ServerFrame::new(ServerMessage::GameState(GameStatePayload {
                            game_state,
                        })),
                    )
                    .await;
            }
        }

        HandlerResult::reply(
            ServerMessage::Authenticated(AuthenticatedPayload {
                connection_id,
                user_id: claims.user_id,
                server_id: self.manager.server_id().to_string(),
                room: snapshot.clone(),
            }),
            request_id,
        )
        .with_broadcast(room_id, ServerMessage::RoomUpdated(snapshot))
    }

    async fn handle_toggle_ready(
        &self,
        connection_id: Uuid,
        request_id: Option<Uuid>,
    ) -> HandlerResult {
        let (_, user_id, room_id) = match self.authenticated_member(connection_id, request_id).await
        {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };

        match self.rooms.toggle_ready(room_id, user_id).await {
            Ok(snapshot) => {
                HandlerResult::reply(ServerMessage::RoomUpdated(snapshot.clone()), request_id)
                    .with_broadcast(room_id, ServerMessage::RoomUpdated(snapshot))
            }
            Err(error) => repo_error(error, request_id),
        }
    }

    async fn handle_leave_room(
        &self,
        connection_id: Uuid,
        request_id: Option<Uuid>,
    ) -> HandlerResult {
        let (_, user_id, room_id) = match self.authenticated_member(connection_id, request_id).await
        {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };

        let outcome = match self.rooms.leave_room(room_id, user_id).await {
            Ok(outcome) => outcome,
            Err(error) => return repo_error(error, request_id),
        };
        self.manager.unbind_room(connection_id).await;

        if outcome.room_closed {
            self.sessions.remove(room_id).await;
            let payload = RoomClosedPayload {
                reason: "host_left".to_string(),
                room_id,
            };
            HandlerResult::reply(ServerMessage::RoomClosed(payload.clone()), request_id)
                .with_broadcast(room_id, ServerMessage::RoomClosed(payload))
        } else {
            HandlerResult::reply(
                ServerMessage::RoomUpdated(outcome.snapshot.clone()),
                request_id,
            )
            .with_broadcast(room_id, ServerMessage::RoomUpdated(outcome.snapshot))
        }
    }

    async fn handle_start_game(
        &self,
        connection_id: Uuid,
        request_id: Option<Uuid>,
    ) -> HandlerResult {
        let (_, user_id, room_id) = match self.authenticated_member(connection_id, request_id).await
        {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };

        let (snapshot, config) = match self.rooms.start_game(room_id, user_id).await {
            Ok(result) => result,
            Err(error) => return repo_error(error, request_id),
        };

        let players: Vec<PlayerSetup> = snapshot
            .seats
            .iter()
            .filter_map(|seat| {
                seat.user_id.map(|user_id| PlayerSetup {
                    user_id,
                    display_name: seat
                        .display_name
                        .clone()
                        .unwrap_or_else(|| format!("Player {}", seat.seat_index + 1)),
                    seat_index: seat.seat_index,
                })
            })
            .collect();

        let seed = rand::rng().random::<u64>();
        let (game_state, events) = match self
            .sessions
            .start(room_id, user_id, &players, &config, seed)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    room_id = %room_id,
                    error = %error,
                    "game initialization failed after room transition"
                );
                return HandlerResult::game_error(error.code, error.message, request_id);
            }
        };

        let payload = GameStartedPayload { game_state, events };
        HandlerResult::reply(ServerMessage::GameStarted(payload.clone()), request_id)
            .with_broadcast(room_id, ServerMessage::GameStarted(payload))
    }

    async fn handle_game_action(
        &self,
        connection_id: Uuid,
        action: ludo_common::game::GameAction,
        request_id: Option<Uuid>,
    ) -> HandlerResult {
        let (_, user_id, room_id) = match self.authenticated_member(connection_id, request_id).await
        {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };

        // The room lock keeps game actions strictly FIFO per room.
        let lock = self.rooms.room_lock(room_id).await;
        let _guard = lock.lock().await;

        match self.sessions.apply(room_id, user_id, &action).await {
            Ok((_, events)) => {
                let payload = GameEventsPayload { events };
                HandlerResult::reply(ServerMessage::GameEvents(payload.clone()), request_id)
                    .with_broadcast(room_id, ServerMessage::GameEvents(payload))
            }
            Err(error) => {
                info!(
                    room_id = %room_id,
                    user_id = %user_id,
                    code = ?error.code,
                    "game action rejected"
                );
                HandlerResult::game_error(error.code, error.message, request_id)
            }
        }
    }
}
