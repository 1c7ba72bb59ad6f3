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

use super::events::{BonusReason, GameEvent, GameEventKind};
use super::{EngineError, current_player_index, current_turn_mut, rolling};
use crate::game::{CaptureTarget, GameState, PendingCapture, PlayerState, Stack, TokenState, TurnPhase};

/// One piece (loose token or whole stack) standing on a road square.
pub(crate) struct Group {
    pub player_idx: usize,
    pub piece_id: String,
    pub token_ids: Vec<String>,
}

/// Every piece on the given absolute road square, skipping the token ids
/// in `exclude` (the group that just moved there).
pub(crate) fn groups_at(state: &GameState, square: u8, exclude: &[String]) -> Vec<Group> {
    let road_length = state.board.road_length;
    let mut groups = Vec::new();

    for (player_idx, player) in state.players.iter().enumerate() {
        for token in &player.tokens {
            if token.in_stack || token.state != TokenState::Road {
                continue;
            }
            if exclude.contains(&token.token_id) {
                continue;
            }
            if (player.start_square + token.progress) % road_length == square {
                groups.push(Group {
                    player_idx,
                    piece_id: token.token_id.clone(),
                    token_ids: vec![token.token_id.clone()],
                });
            }
        }
        for stack in &player.stacks {
            let Some(first) = stack.tokens.first().and_then(|id| player.token(id)) else {
                continue;
            };
            if first.state != TokenState::Road {
                continue;
            }
            if stack.tokens.iter().any(|id| exclude.contains(id)) {
                continue;
            }
            if (player.start_square + first.progress) % road_length == square {
                groups.push(Group {
                    player_idx,
                    piece_id: stack.stack_id.clone(),
                    token_ids: stack.tokens.clone(),
                });
            }
        }
    }

    groups
}

/// Resolve what happens on the square the mover just landed on. Returns
/// true when the move is suspended awaiting a capture choice.
pub(crate) fn resolve_collisions(
    state: &mut GameState,
    mover_idx: usize,
    square: u8,
    moving_token_ids: &[String],
    events: &mut Vec<GameEvent>,
) -> Result<bool, EngineError> {
    if state.board.is_safe(square) {
        return Ok(false);
    }

    let opponents: Vec<Group> = groups_at(state, square, moving_token_ids)
        .into_iter()
        .filter(|g| g.player_idx != mover_idx)
        .collect();

    if opponents.len() > 1 && state.board.capture_choice_required {
        let mover_id = state.players[mover_idx].user_id;
        let targets: Vec<CaptureTarget> = opponents
            .iter()
            .map(|g| CaptureTarget {
                piece_id: g.piece_id.clone(),
                owner_id: state.players[g.player_idx].user_id,
                token_ids: g.token_ids.clone(),
            })
            .collect();
        let options: Vec<String> = targets.iter().map(|t| t.piece_id.clone()).collect();

        let turn = current_turn_mut(state)?;
        turn.pending_capture = Some(PendingCapture {
            position: square,
            moving_token_ids: moving_token_ids.to_vec(),
            targets,
        });
        events.push(GameEvent::unsequenced(
            GameEventKind::CaptureChoiceRequested {
                player_id: mover_id,
                options,
            },
        ));
        state.turn_phase = TurnPhase::AwaitingCaptureChoice;
        return Ok(true);
    }

    let captured_any = !opponents.is_empty();
    for group in &opponents {
        capture_group(
            state,
            mover_idx,
            group.player_idx,
            &group.token_ids,
            square,
            events,
        );
    }
    if captured_any {
        grant_capture_bonus(state, events)?;
    }

    merge_own(state, mover_idx, square, events)?;
    Ok(false)
}

/// Process a `capture_choice` action naming one of the pending targets.
pub(crate) fn process_capture_choice(
    state: &mut GameState,
    target: &str,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let mover_idx = current_player_index(state)?;
    let pending = current_turn_mut(state)?
        .pending_capture
        .take()
        .ok_or_else(|| EngineError::internal("capture phase without pending capture"))?;

    let chosen = pending
        .targets
        .iter()
        .find(|t| t.piece_id == target)
        .ok_or_else(|| EngineError::internal("validated capture target disappeared"))?;
    let victim_idx = state
        .players
        .iter()
        .position(|p| p.user_id == chosen.owner_id)
        .ok_or_else(|| EngineError::internal("capture target owner missing from game"))?;

    capture_group(
        state,
        mover_idx,
        victim_idx,
        &chosen.token_ids,
        pending.position,
        events,
    );
    grant_capture_bonus(state, events)?;
    merge_own(state, mover_idx, pending.position, events)?;

    rolling::advance_allocation(state, events)
}

fn capture_group(
    state: &mut GameState,
    mover_idx: usize,
    victim_idx: usize,
    token_ids: &[String],
    square: u8,
    events: &mut Vec<GameEvent>,
) {
    let capturing_player_id = state.players[mover_idx].user_id;
    let captured_player_id = state.players[victim_idx].user_id;
    send_to_hell(&mut state.players[victim_idx], token_ids);
    events.push(GameEvent::unsequenced(GameEventKind::CaptureOccurred {
        capturing_player_id,
        captured_player_id,
        token_ids: token_ids.to_vec(),
        position: square,
        grants_bonus_roll: true,
    }));
}

pub(crate) fn send_to_hell(player: &mut PlayerState, token_ids: &[String]) {
    for token in player.tokens.iter_mut() {
        if token_ids.contains(&token.token_id) {
            token.state = TokenState::Hell;
            token.progress = 0;
            token.in_stack = false;
        }
    }
    player
        .stacks
        .retain(|s| !s.tokens.iter().any(|id| token_ids.contains(id)));
}

fn grant_capture_bonus(
    state: &mut GameState,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let turn = current_turn_mut(state)?;
    turn.extra_rolls += 1;
    let player_id = turn.user_id;
    events.push(GameEvent::unsequenced(GameEventKind::BonusRollGranted {
        player_id,
        reason: BonusReason::Capture,
    }));
    Ok(())
}

/// Collapse every piece the mover owns on `square` into a single stack.
fn merge_own(
    state: &mut GameState,
    mover_idx: usize,
    square: u8,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let own: Vec<Group> = groups_at(state, square, &[])
        .into_iter()
        .filter(|g| g.player_idx == mover_idx)
        .collect();
    if own.len() < 2 {
        return Ok(());
    }

    let merged_tokens: Vec<String> = own.iter().flat_map(|g| g.token_ids.clone()).collect();
    let player = &mut state.players[mover_idx];
    let player_id = player.user_id;

    player
        .stacks
        .retain(|s| !own.iter().any(|g| g.piece_id == s.stack_id));
    let stack_id = next_stack_id(player);
    for token in player.tokens.iter_mut() {
        if merged_tokens.contains(&token.token_id) {
            token.in_stack = true;
        }
    }
    player.stacks.push(Stack {
        stack_id: stack_id.clone(),
        tokens: merged_tokens.clone(),
    });

    events.push(GameEvent::unsequenced(GameEventKind::StackMerged {
        player_id,
        stack_id,
        token_ids: merged_tokens,
        position: square,
    }));
    Ok(())
}

pub(crate) fn next_stack_id(player: &PlayerState) -> String {
    let mut n = 1;
    loop {
        let id = format!("{}_stack_{n}", player.user_id);
        if player.stack(&id).is_none() {
            return id;
        }
        n += 1;
    }
}
