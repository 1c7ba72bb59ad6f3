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

//! The `/api/v1/ws` endpoint: accept, pre-auth hello, 30-second auth
//! window, framed JSON in, dispatcher out, and full cleanup (presence,
//! seat state, host-departure closure) when the socket goes away.

use std::collections::VecDeque;
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use ludo_common::wire::{
    ClientFrame, ClientMessage, ConnectedPayload, ErrorCode, ServerFrame, ServerMessage,
    close_code,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::connections::{OUTBOUND_QUEUE_SIZE, Outgoing};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub const MAX_MESSAGES_PER_SECOND: usize = 10;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window message rate limiter for one connection.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: VecDeque::new(),
        }
    }

    pub fn allow(&mut self, now: Instant) -> bool {
        while self
            .hits
            .front()
            .is_some_and(|&t| now.duration_since(t) > self.window)
        {
            self.hits.pop_front();
        }
        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

pub async fn ws_route(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outgoing>(OUTBOUND_QUEUE_SIZE);
    let control = tx.clone();

    let connection_id = state.manager.register(tx).await;
    info!(connection_id = %connection_id, "websocket connection accepted");

    // One writer task per socket drains the outbound queue in order.
    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outgoing::Frame(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(error = %error, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close(code, reason) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    state
        .manager
        .send_to_connection(
            connection_id,
            ServerFrame::new(ServerMessage::Connected(ConnectedPayload {
                connection_id,
                server_id: state.settings.server_id.clone(),
            })),
        )
        .await;

    let auth_deadline = Instant::now() + state.settings.auth_timeout;
    let mut limiter = RateLimiter::new(MAX_MESSAGES_PER_SECOND, RATE_LIMIT_WINDOW);

    loop {
        let authenticated = state
            .manager
            .get(connection_id)
            .await
            .map(|info| info.authenticated)
            .unwrap_or(false);

        // The auth timer only runs while the connection is anonymous.
        let received = if authenticated {
            stream.next().await
        } else {
            match tokio::time::timeout_at(auth_deadline, stream.next()).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(
                        connection_id = %connection_id,
                        "connection timed out waiting for authentication"
                    );
                    let _ = control
                        .send(Outgoing::Close(
                            close_code::AUTH_TIMEOUT,
                            "authentication timeout".to_string(),
                        ))
                        .await;
                    break;
                }
            }
        };

        let message = match received {
            Some(Ok(message)) => message,
            Some(Err(error)) => {
                debug!(connection_id = %connection_id, error = %error, "websocket read error");
                break;
            }
            None => break,
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        connection_id = %connection_id,
                        size = text.len(),
                        "oversized message rejected"
                    );
                    state
                        .manager
                        .send_to_connection(
                            connection_id,
                            ServerFrame::error(
                                ErrorCode::MessageTooLarge,
                                format!("message exceeds {MAX_MESSAGE_SIZE} bytes"),
                                None,
                            ),
                        )
                        .await;
                    continue;
                }
                if !limiter.allow(Instant::now()) {
                    state
                        .manager
                        .send_to_connection(
                            connection_id,
                            ServerFrame::error(
                                ErrorCode::RateLimited,
                                "too many messages, slow down",
                                None,
                            ),
                        )
                        .await;
                    continue;
                }

                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(error) => {
                        debug!(
                            connection_id = %connection_id,
                            error = %error,
                            "undecodable client frame"
                        );
                        state
                            .manager
                            .send_to_connection(
                                connection_id,
                                ServerFrame::error(
                                    ErrorCode::InvalidMessage,
                                    "invalid message format",
                                    None,
                                ),
                            )
                            .await;
                        continue;
                    }
                };

                // Before authentication only `authenticate` and `ping`
                // are admissible.
                if !authenticated
                    && !matches!(
                        frame.message,
                        ClientMessage::Authenticate(_) | ClientMessage::Ping
                    )
                {
                    state
                        .manager
                        .send_to_connection(
                            connection_id,
                            ServerFrame::error(
                                ErrorCode::Unauthenticated,
                                "authenticate first",
                                frame.request_id,
                            ),
                        )
                        .await;
                    continue;
                }

                let result = state.dispatcher.dispatch(connection_id, frame).await;
                if let Some(response) = result.response {
                    state
                        .manager
                        .send_to_connection(connection_id, response)
                        .await;
                }
                if let (Some(broadcast), Some(room_id)) = (result.broadcast, result.room_id) {
                    state
                        .manager
                        .send_to_room(room_id, broadcast, Some(connection_id))
                        .await;
                }
            }
            Message::Binary(_) => {
                state
                    .manager
                    .send_to_connection(
                        connection_id,
                        ServerFrame::error(
                            ErrorCode::InvalidMessage,
                            "binary frames are not supported",
                            None,
                        ),
                    )
                    .await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                state.manager.touch(connection_id).await;
            }
            Message::Close(_) => break,
        }
    }

    // Teardown: presence, seat state, host-departure closure, session.
    let removed = state.manager.remove(connection_id).await;
    if let Some(info) = &removed {
        if let Some(user_id) = info.user_id {
            state.presence.on_disconnect(user_id).await;
        }
        if let Some(outcome) = state.rooms.handle_disconnect(info).await {
            if outcome.room_closed {
                state.sessions.remove(outcome.room_id).await;
            }
        }
    }
    drop(control);
    let _ = writer.await;

    let connected_for = removed
        .map(|info| (chrono::Utc::now() - info.connected_at).num_seconds())
        .unwrap_or(0);
    info!(
        connection_id = %connection_id,
        connected_for_secs = connected_for,
        "websocket connection closed"
    );
}

/// Periodically closes connections whose heartbeat went stale. The
/// socket tasks handle their own seat/presence cleanup when told to go.
pub async fn run_stale_sweeper(state: AppState) {
    let interval = state.settings.ws_heartbeat_interval;
    let timeout = state.settings.ws_connection_timeout;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(60));
        let stale = state.manager.idle_since(cutoff).await;
        if stale.is_empty() {
            continue;
        }
        info!(count = stale.len(), "closing stale connections");
        for connection_id in stale {
            state
                .manager
                .close_connection(connection_id, close_code::GOING_AWAY, "connection stale")
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_allows_up_to_the_cap_per_window() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(limiter.allow(start));
        assert!(limiter.allow(start));
        assert!(!limiter.allow(start));
    }

    #[test]
    fn rate_limiter_recovers_after_the_window_passes() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(limiter.allow(start));
        assert!(!limiter.allow(start));

        let later = start + Duration::from_millis(1500);
        assert!(limiter.allow(later));
    }
}
