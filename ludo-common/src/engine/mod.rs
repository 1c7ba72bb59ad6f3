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

//! Pure rules core. `process_action` is the single entry point: it never
//! mutates the input state, routes all randomness through the injected
//! RNG, and reports everything observable as an ordered event list.

mod captures;
pub mod events;
mod legal;
mod movement;
mod rolling;

use rand::Rng;
use uuid::Uuid;

use crate::game::{GameAction, GamePhase, GameState, Turn, TurnPhase};
use crate::wire::ErrorCode;
use events::{GameEvent, GameEventKind, TurnEndReason};

pub use legal::{effective_roll, has_any_legal_moves, legal_moves};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn bad_phase(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadPhase,
            message: message.into(),
        }
    }

    pub fn illegal_move(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::IllegalMove,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Process one action against a game state.
///
/// Returns the successor state and the events it produced; on error the
/// caller's state is untouched. Identical `(state, action, rng seed)`
/// triples yield identical results.
pub fn process_action(
    state: &GameState,
    action: &GameAction,
    player_id: Uuid,
    rng: &mut impl Rng,
) -> Result<(GameState, Vec<GameEvent>), EngineError> {
    validate(state, action, player_id)?;

    let mut next = state.clone();
    let mut events = Vec::new();

    match action {
        GameAction::StartGame => start_game(&mut next, &mut events)?,
        GameAction::Roll => rolling::process_roll(&mut next, player_id, rng, &mut events)?,
        GameAction::Move {
            token_or_stack_id,
            die,
        } => movement::process_move(&mut next, token_or_stack_id, *die, &mut events)?,
        GameAction::CaptureChoice { target } => {
            captures::process_capture_choice(&mut next, target, &mut events)?
        }
    }

    for event in &mut events {
        event.seq = next.event_seq;
        next.event_seq += 1;
    }

    Ok((next, events))
}

fn validate(state: &GameState, action: &GameAction, player_id: Uuid) -> Result<(), EngineError> {
    if let GameAction::StartGame = action {
        if state.phase != GamePhase::NotStarted {
            return Err(EngineError::bad_phase("game has already started"));
        }
        return Ok(());
    }

    match state.phase {
        GamePhase::NotStarted => return Err(EngineError::bad_phase("game has not started yet")),
        GamePhase::Finished => return Err(EngineError::bad_phase("game has already finished")),
        GamePhase::InProgress => {}
    }

    let turn = state
        .turn
        .as_ref()
        .ok_or_else(|| EngineError::bad_phase("no active turn"))?;
    if turn.user_id != player_id {
        return Err(EngineError::bad_phase("it is not your turn"));
    }

    match action {
        GameAction::Roll => {
            if state.turn_phase != TurnPhase::AwaitingRoll {
                return Err(EngineError::bad_phase(
                    "cannot roll dice while waiting for a different action",
                ));
            }
        }
        GameAction::Move {
            token_or_stack_id, ..
        } => {
            if state.turn_phase != TurnPhase::AwaitingMove {
                return Err(EngineError::bad_phase(
                    "cannot move while waiting for a different action",
                ));
            }
            if !turn.legal_moves.iter().any(|m| m == token_or_stack_id) {
                return Err(EngineError::illegal_move(format!(
                    "'{token_or_stack_id}' is not a legal move"
                )));
            }
        }
        GameAction::CaptureChoice { target } => {
            if state.turn_phase != TurnPhase::AwaitingCaptureChoice {
                return Err(EngineError::bad_phase(
                    "cannot make a capture choice outside capture resolution",
                ));
            }
            let pending = turn
                .pending_capture
                .as_ref()
                .ok_or_else(|| EngineError::internal("capture phase without pending capture"))?;
            if !pending.targets.iter().any(|t| &t.piece_id == target) {
                return Err(EngineError::illegal_move(format!(
                    "'{target}' is not a capturable group"
                )));
            }
        }
        GameAction::StartGame => {}
    }

    Ok(())
}

fn start_game(state: &mut GameState, events: &mut Vec<GameEvent>) -> Result<(), EngineError> {
    let first = state
        .player_by_order(1)
        .ok_or_else(|| EngineError::internal("game has no players"))?;
    let first_id = first.user_id;

    let mut order: Vec<&crate::game::PlayerState> = state.players.iter().collect();
    order.sort_by_key(|p| p.turn_order);
    let player_order: Vec<Uuid> = order.iter().map(|p| p.user_id).collect();

    events.push(GameEvent::unsequenced(GameEventKind::GameStarted {
        player_order,
        first_player_id: first_id,
    }));
    events.push(GameEvent::unsequenced(GameEventKind::TurnStarted {
        player_id: first_id,
        turn_number: 1,
    }));
    events.push(GameEvent::unsequenced(GameEventKind::RollGranted {
        player_id: first_id,
    }));

    state.phase = GamePhase::InProgress;
    state.turn_phase = TurnPhase::AwaitingRoll;
    state.turn = Some(Turn::new(first_id, 1));
    Ok(())
}

pub(crate) fn current_turn(state: &GameState) -> Result<&Turn, EngineError> {
    state
        .turn
        .as_ref()
        .ok_or_else(|| EngineError::internal("no active turn"))
}

pub(crate) fn current_turn_mut(state: &mut GameState) -> Result<&mut Turn, EngineError> {
    state
        .turn
        .as_mut()
        .ok_or_else(|| EngineError::internal("no active turn"))
}

pub(crate) fn current_player_index(state: &GameState) -> Result<usize, EngineError> {
    let user_id = current_turn(state)?.user_id;
    state
        .players
        .iter()
        .position(|p| p.user_id == user_id)
        .ok_or_else(|| EngineError::internal("current player missing from game"))
}

/// Hand the turn to the next unfinished player in rotation order.
pub(crate) fn rotate_turn(
    state: &mut GameState,
    reason: TurnEndReason,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let turn = current_turn(state)?;
    let ending_player = turn.user_id;
    let current_order = turn.turn_order;
    let player_count = state.players.len() as u8;

    let mut next_order = current_order;
    let mut next_player = None;
    for _ in 0..player_count {
        next_order = (next_order % player_count) + 1;
        if let Some(candidate) = state.player_by_order(next_order) {
            if !candidate.finished() {
                next_player = Some((candidate.user_id, next_order));
                break;
            }
        }
    }

    let Some((next_id, next_order)) = next_player else {
        return Err(EngineError::internal("no unfinished player to rotate to"));
    };

    events.push(GameEvent::unsequenced(GameEventKind::TurnEnded {
        player_id: ending_player,
        reason,
        next_player_id: Some(next_id),
    }));
    events.push(GameEvent::unsequenced(GameEventKind::TurnStarted {
        player_id: next_id,
        turn_number: next_order,
    }));
    events.push(GameEvent::unsequenced(GameEventKind::RollGranted {
        player_id: next_id,
    }));

    state.turn = Some(Turn::new(next_id, next_order));
    state.turn_phase = TurnPhase::AwaitingRoll;
    Ok(())
}

/// Close out the game: remaining players are appended to the rankings in
/// rotation order and `game_ended` is emitted.
pub(crate) fn finish_game(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let mut rankings = state.rankings.clone();
    let mut remaining: Vec<&crate::game::PlayerState> = state
        .players
        .iter()
        .filter(|p| !rankings.contains(&p.user_id))
        .collect();
    remaining.sort_by_key(|p| p.turn_order);
    rankings.extend(remaining.iter().map(|p| p.user_id));

    if let Some(&winner_id) = rankings.first() {
        events.push(GameEvent::unsequenced(GameEventKind::GameEnded {
            winner_id,
            rankings: rankings.clone(),
        }));
    }

    state.rankings = rankings;
    state.phase = GamePhase::Finished;
    state.turn_phase = TurnPhase::Finished;
    state.turn = None;
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::game::TokenState;

    #[test]
    fn start_game_emits_start_turn_and_roll_grant() {
        let state = new_game(&[P1, P2]);
        let (next, events) =
            process_action(&state, &GameAction::StartGame, P1, &mut seeded_rng()).unwrap();

        assert_eq!(next.phase, GamePhase::InProgress);
        assert_eq!(next.turn_phase, TurnPhase::AwaitingRoll);
        assert_eq!(next.turn.as_ref().unwrap().user_id, P1);
        assert_eq!(
            event_types(&events),
            vec!["game_started", "turn_started", "roll_granted"]
        );
        match &events[0].kind {
            GameEventKind::GameStarted {
                player_order,
                first_player_id,
            } => {
                assert_eq!(player_order, &vec![P1, P2]);
                assert_eq!(*first_player_id, P1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn start_game_twice_is_a_bad_phase() {
        let state = started_game(&[P1, P2]);
        let err = process_action(&state, &GameAction::StartGame, P1, &mut seeded_rng())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[test]
    fn actions_before_start_are_rejected() {
        let state = new_game(&[P1, P2]);
        let err = process_action(&state, &GameAction::Roll, P1, &mut seeded_rng()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[test]
    fn rolling_out_of_turn_is_rejected() {
        let state = started_game(&[P1, P2]);
        let err = process_action(&state, &GameAction::Roll, P2, &mut seeded_rng()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[test]
    fn moving_while_awaiting_roll_is_rejected() {
        let state = started_game(&[P1, P2]);
        let action = GameAction::Move {
            token_or_stack_id: token_id(P1, 0),
            die: None,
        };
        let err = process_action(&state, &action, P1, &mut seeded_rng()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPhase);
    }

    #[test]
    fn events_carry_monotonic_sequence_numbers() {
        let state = new_game(&[P1, P2]);
        let (next, events) =
            process_action(&state, &GameAction::StartGame, P1, &mut seeded_rng()).unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(next.event_seq, 3);

        let (after, more) = roll(&next, P1, 3);
        assert_eq!(more.first().unwrap().seq, 3);
        assert!(after.event_seq > next.event_seq);
    }

    #[test]
    fn process_action_is_deterministic_for_a_seed() {
        use rand::SeedableRng;
        let state = started_game(&[P1, P2]);

        let mut rng_a = rand::rngs::StdRng::seed_from_u64(99);
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(99);
        let result_a = process_action(&state, &GameAction::Roll, P1, &mut rng_a).unwrap();
        let result_b = process_action(&state, &GameAction::Roll, P1, &mut rng_b).unwrap();
        assert_eq!(result_a, result_b);
    }

    #[test]
    fn errors_leave_the_caller_state_untouched() {
        let state = started_game(&[P1, P2]);
        let before = state.clone();
        let _ = process_action(&state, &GameAction::Roll, P2, &mut seeded_rng()).unwrap_err();
        assert_eq!(state, before);
    }

    #[test]
    fn rotation_skips_finished_players() {
        let mut state = started_game(&[P1, P2, P3]);
        // Every P2 token in heaven.
        for i in 0..4 {
            place_token(
                &mut state,
                P2,
                i,
                crate::game::Token {
                    token_id: token_id(P2, i),
                    state: TokenState::Heaven,
                    progress: 57,
                    in_stack: false,
                },
            );
        }
        // P1 rolls a non-6 with everything in hell: no legal moves, turn
        // passes over the finished P2 straight to P3.
        let (next, _) = roll(&state, P1, 3);
        assert_eq!(next.turn.as_ref().unwrap().user_id, P3);
    }
}
