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

//! Owner of the live socket set on this instance. Each connection has a
//! bounded outbound queue drained by its socket task; a failed or
//! rejected send drops that connection without disturbing the rest of a
//! room broadcast.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use ludo_common::wire::ServerFrame;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

pub const OUTBOUND_QUEUE_SIZE: usize = 64;

/// One item on a connection's outbound queue: a frame to write, or an
/// instruction to close the socket with the given code.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Frame(ServerFrame),
    Close(u16, String),
}

pub type Outbound = mpsc::Sender<Outgoing>;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub user_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    sender: Outbound,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    by_room: HashMap<Uuid, HashSet<Uuid>>,
}

impl Tables {
    fn unlink(&mut self, entry: &ConnectionEntry) {
        let connection_id = entry.info.connection_id;
        if let Some(user_id) = entry.info.user_id {
            if let Some(set) = self.by_user.get_mut(&user_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    self.by_user.remove(&user_id);
                }
            }
        }
        if let Some(room_id) = entry.info.room_id {
            if let Some(set) = self.by_room.get_mut(&room_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    self.by_room.remove(&room_id);
                }
            }
        }
    }

    fn drop_connection(&mut self, connection_id: Uuid) -> Option<ConnectionInfo> {
        let entry = self.connections.remove(&connection_id)?;
        self.unlink(&entry);
        Some(entry.info)
    }

    /// Queue a frame on one connection. On failure the connection is
    /// removed; dropping its sender ends the socket task.
    fn push(&mut self, connection_id: Uuid, frame: ServerFrame) -> bool {
        let Some(entry) = self.connections.get(&connection_id) else {
            return false;
        };
        match entry.sender.try_send(Outgoing::Frame(frame)) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    connection_id = %connection_id,
                    error = %error,
                    "dropping connection with a dead or saturated outbound queue"
                );
                self.drop_connection(connection_id);
                false
            }
        }
    }
}

pub struct ConnectionManager {
    tables: Mutex<Tables>,
    server_id: String,
}

impl ConnectionManager {
    pub fn new(server_id: String) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            server_id,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Track a freshly accepted, still unauthenticated socket.
    pub async fn register(&self, sender: Outbound) -> Uuid {
        let connection_id = Uuid::new_v4();
        let now = Utc::now();
        let entry = ConnectionEntry {
            info: ConnectionInfo {
                connection_id,
                user_id: None,
                room_id: None,
                authenticated: false,
                connected_at: now,
                last_seen: now,
            },
            sender,
        };
        self.tables
            .lock()
            .await
            .connections
            .insert(connection_id, entry);
        debug!(connection_id = %connection_id, "connection registered");
        connection_id
    }

    /// Promote a connection to authenticated and bind it to its room.
    pub async fn authenticate(&self, connection_id: Uuid, user_id: Uuid, room_id: Uuid) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(entry) = tables.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.info.user_id = Some(user_id);
        entry.info.room_id = Some(room_id);
        entry.info.authenticated = true;
        entry.info.last_seen = Utc::now();
        tables
            .by_user
            .entry(user_id)
            .or_default()
            .insert(connection_id);
        tables
            .by_room
            .entry(room_id)
            .or_default()
            .insert(connection_id);
        true
    }

    pub async fn touch(&self, connection_id: Uuid) {
        if let Some(entry) = self.tables.lock().await.connections.get_mut(&connection_id) {
            entry.info.last_seen = Utc::now();
        }
    }

    pub async fn get(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        self.tables
            .lock()
            .await
            .connections
            .get(&connection_id)
            .map(|e| e.info.clone())
    }

    /// Detach a connection from its room (the user left the room but the
    /// socket stays up).
    pub async fn unbind_room(&self, connection_id: Uuid) {
        let mut tables = self.tables.lock().await;
        let Some(entry) = tables.connections.get_mut(&connection_id) else {
            return;
        };
        let Some(room_id) = entry.info.room_id.take() else {
            return;
        };
        if let Some(set) = tables.by_room.get_mut(&room_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                tables.by_room.remove(&room_id);
            }
        }
    }

    pub async fn send_to_connection(&self, connection_id: Uuid, frame: ServerFrame) -> bool {
        self.tables.lock().await.push(connection_id, frame)
    }

    pub async fn send_to_user(&self, user_id: Uuid, frame: ServerFrame) -> usize {
        let mut tables = self.tables.lock().await;
        let targets: Vec<Uuid> = tables
            .by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        targets
            .into_iter()
            .filter(|&cid| tables.push(cid, frame.clone()))
            .count()
    }

    /// Fan a frame out to every connection bound to the room, optionally
    /// excluding the originator. A failed member never interrupts the
    /// rest of the broadcast.
    pub async fn send_to_room(
        &self,
        room_id: Uuid,
        frame: ServerFrame,
        except: Option<Uuid>,
    ) -> usize {
        let mut tables = self.tables.lock().await;
        let targets: Vec<Uuid> = tables
            .by_room
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        targets
            .into_iter()
            .filter(|&cid| Some(cid) != except)
            .filter(|&cid| tables.push(cid, frame.clone()))
            .count()
    }

    pub async fn broadcast(&self, frame: ServerFrame) -> usize {
        let mut tables = self.tables.lock().await;
        let targets: Vec<Uuid> = tables.connections.keys().copied().collect();
        targets
            .into_iter()
            .filter(|&cid| tables.push(cid, frame.clone()))
            .count()
    }

    /// Remove a connection from every index, returning its final state
    /// so the caller can update seats and presence.
    pub async fn remove(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        self.tables.lock().await.drop_connection(connection_id)
    }

    /// Ask a connection's socket task to close with the given code. Seat
    /// and presence cleanup happens when that task unwinds.
    pub async fn close_connection(&self, connection_id: Uuid, code: u16, reason: &str) {
        let tables = self.tables.lock().await;
        if let Some(entry) = tables.connections.get(&connection_id) {
            let _ = entry
                .sender
                .try_send(Outgoing::Close(code, reason.to_string()));
        }
    }

    /// Graceful shutdown: every socket is told to close with the code.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let tables = self.tables.lock().await;
        for entry in tables.connections.values() {
            let _ = entry
                .sender
                .try_send(Outgoing::Close(code, reason.to_string()));
        }
    }

    /// Does the user still have another connection bound to the room?
    pub async fn user_still_in_room(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        except: Uuid,
    ) -> bool {
        let tables = self.tables.lock().await;
        let Some(set) = tables.by_user.get(&user_id) else {
            return false;
        };
        set.iter().any(|cid| {
            *cid != except
                && tables
                    .connections
                    .get(cid)
                    .is_some_and(|e| e.info.room_id == Some(room_id))
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.tables.lock().await.connections.len()
    }

    pub async fn room_connection_count(&self, room_id: Uuid) -> usize {
        self.tables
            .lock()
            .await
            .by_room
            .get(&room_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Connections whose last heartbeat is older than the cutoff.
    pub async fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.tables
            .lock()
            .await
            .connections
            .values()
            .filter(|e| e.info.last_seen < cutoff)
            .map(|e| e.info.connection_id)
            .collect()
    }
}
