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

//! Live games, one per room in `in_game`. Games are memory-resident:
//! nothing is persisted, and the session evaporates with the room.
//! Callers serialize per room via the room service lock, so action
//! processing for one room is strictly FIFO.

use std::collections::HashMap;

use ludo_common::engine::{EngineError, events::GameEvent, process_action};
use ludo_common::game::{GameAction, GameState, PlayerSetup, RulesetConfig, initialize_game};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

struct GameSession {
    state: GameState,
    rng: StdRng,
}

#[derive(Default)]
pub struct GameSessions {
    sessions: Mutex<HashMap<Uuid, GameSession>>,
}

impl GameSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the game for a room and run the opening `start_game`
    /// action. Fails when a game already exists or the seat layout is
    /// unusable.
    pub async fn start(
        &self,
        room_id: Uuid,
        host_id: Uuid,
        players: &[PlayerSetup],
        config: &RulesetConfig,
        seed: u64,
    ) -> Result<(GameState, Vec<GameEvent>), EngineError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&room_id) {
            return Err(EngineError::bad_phase("a game is already running"));
        }

        let initial = initialize_game(players, config).map_err(EngineError::bad_phase)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let (state, events) =
            process_action(&initial, &GameAction::StartGame, host_id, &mut rng)?;

        info!(
            room_id = %room_id,
            players = players.len(),
            "game session started"
        );
        sessions.insert(
            room_id,
            GameSession {
                state: state.clone(),
                rng,
            },
        );
        Ok((state, events))
    }

    /// Feed one action through the engine. State advances only on
    /// success; an engine error leaves the session untouched.
    pub async fn apply(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        action: &GameAction,
    ) -> Result<(GameState, Vec<GameEvent>), EngineError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&room_id)
            .ok_or_else(|| EngineError::bad_phase("no game running for this room"))?;

        let (state, events) = process_action(&session.state, action, user_id, &mut session.rng)?;
        session.state = state.clone();
        Ok((state, events))
    }

    pub async fn snapshot(&self, room_id: Uuid) -> Option<GameState> {
        self.sessions
            .lock()
            .await
            .get(&room_id)
            .map(|s| s.state.clone())
    }

    pub async fn remove(&self, room_id: Uuid) {
        if self.sessions.lock().await.remove(&room_id).is_some() {
            info!(room_id = %room_id, "game session dropped");
        }
    }

    pub async fn active_games(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ludo_common::game::GamePhase;
    use ludo_common::wire::ErrorCode;

    fn players() -> Vec<PlayerSetup> {
        vec![
            PlayerSetup {
                user_id: Uuid::from_u128(1),
                display_name: "Player 1".to_string(),
                seat_index: 0,
            },
            PlayerSetup {
                user_id: Uuid::from_u128(2),
                display_name: "Player 2".to_string(),
                seat_index: 1,
            },
        ]
    }

    #[tokio::test]
    async fn start_creates_a_running_game() {
        let sessions = GameSessions::new();
        let room = Uuid::new_v4();
        let (state, events) = sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap();

        assert_eq!(state.phase, GamePhase::InProgress);
        assert!(!events.is_empty());
        assert!(sessions.snapshot(room).await.is_some());
        assert_eq!(sessions.active_games().await, 1);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let sessions = GameSessions::new();
        let room = Uuid::new_v4();
        sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap();

        let err = sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[tokio::test]
    async fn actions_advance_the_stored_state() {
        let sessions = GameSessions::new();
        let room = Uuid::new_v4();
        sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap();

        let before = sessions.snapshot(room).await.unwrap();
        let (after, events) = sessions
            .apply(room, Uuid::from_u128(1), &GameAction::Roll)
            .await
            .unwrap();
        assert!(!events.is_empty());
        assert!(after.event_seq > before.event_seq);
        assert_eq!(sessions.snapshot(room).await.unwrap(), after);
    }

    #[tokio::test]
    async fn rejected_actions_leave_the_state_alone() {
        let sessions = GameSessions::new();
        let room = Uuid::new_v4();
        sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap();

        let before = sessions.snapshot(room).await.unwrap();
        // Player 2 rolling out of turn.
        let err = sessions
            .apply(room, Uuid::from_u128(2), &GameAction::Roll)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
        assert_eq!(sessions.snapshot(room).await.unwrap(), before);
    }

    #[tokio::test]
    async fn actions_without_a_session_are_bad_phase() {
        let sessions = GameSessions::new();
        let err = sessions
            .apply(Uuid::new_v4(), Uuid::from_u128(1), &GameAction::Roll)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let sessions = GameSessions::new();
        let room = Uuid::new_v4();
        sessions
            .start(
                room,
                Uuid::from_u128(1),
                &players(),
                &RulesetConfig::default(),
                42,
            )
            .await
            .unwrap();
        sessions.remove(room).await;
        assert!(sessions.snapshot(room).await.is_none());
    }
}
