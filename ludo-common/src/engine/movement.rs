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

use super::events::{GameEvent, GameEventKind};
use super::{
    EngineError, captures, current_player_index, current_turn, current_turn_mut, legal, rolling,
};
use crate::game::{GamePhase, GameState, Stack, TokenState, TurnPhase};

struct MovingGroup {
    token_ids: Vec<String>,
    from_state: TokenState,
    from_progress: u8,
}

pub(crate) fn process_move(
    state: &mut GameState,
    piece_id: &str,
    die_override: Option<u8>,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let die = *current_turn(state)?
        .dice
        .first()
        .ok_or_else(|| EngineError::internal("awaiting a move with an empty dice queue"))?;
    if let Some(requested) = die_override {
        if requested != die {
            return Err(EngineError::illegal_move(format!(
                "die {requested} is not being allocated; the next die is {die}"
            )));
        }
    }

    apply_move(state, piece_id, die, events)?;
    if state.turn_phase == TurnPhase::AwaitingCaptureChoice || state.phase == GamePhase::Finished {
        return Ok(());
    }
    rolling::advance_allocation(state, events)
}

/// Apply one selected move: consume the head die, advance the chosen
/// token/stack (splitting first if a partial move was named), then
/// resolve captures, merges, and the win condition.
pub(crate) fn apply_move(
    state: &mut GameState,
    piece_id: &str,
    die: u8,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let player_idx = current_player_index(state)?;
    let player_id = state.players[player_idx].user_id;

    {
        let turn = current_turn_mut(state)?;
        if !turn.dice.is_empty() {
            turn.dice.remove(0);
        }
        turn.legal_moves.clear();
    }

    let moving = select_piece(state, player_idx, piece_id, events)?;
    let height = moving.token_ids.len() as u8;

    let homestretch_entry = state.board.homestretch_entry();
    let win_progress = state.board.win_progress();
    let road_length = state.board.road_length;

    let (to_state, to_progress, effective) = match moving.from_state {
        TokenState::Hell => (TokenState::Road, 0u8, die),
        TokenState::Road | TokenState::Homestretch => {
            let effective = legal::effective_roll(die, height);
            let to_progress = moving.from_progress + effective;
            let to_state = if to_progress == win_progress {
                TokenState::Heaven
            } else if to_progress >= homestretch_entry {
                TokenState::Homestretch
            } else {
                TokenState::Road
            };
            (to_state, to_progress, effective)
        }
        TokenState::Heaven => {
            return Err(EngineError::illegal_move("token has already finished"));
        }
    };

    {
        let player = &mut state.players[player_idx];
        for token_id in &moving.token_ids {
            if let Some(token) = player.tokens.iter_mut().find(|t| &t.token_id == token_id) {
                token.state = to_state;
                token.progress = to_progress;
                if to_state == TokenState::Heaven {
                    token.in_stack = false;
                }
            }
        }
        if to_state == TokenState::Heaven {
            player
                .stacks
                .retain(|s| !s.tokens.iter().any(|id| moving.token_ids.contains(id)));
        }
    }

    events.push(GameEvent::unsequenced(GameEventKind::TokenMoved {
        player_id,
        token_ids: moving.token_ids.clone(),
        from_state: moving.from_state,
        to_state,
        from_progress: moving.from_progress,
        to_progress,
        die,
        effective_roll: effective,
    }));

    if to_state == TokenState::Heaven {
        for token_id in &moving.token_ids {
            events.push(GameEvent::unsequenced(GameEventKind::TokenReachedHeaven {
                player_id,
                token_id: token_id.clone(),
            }));
        }
    }

    if to_state == TokenState::Road {
        let square =
            (state.players[player_idx].start_square + to_progress) % road_length;
        let pending =
            captures::resolve_collisions(state, player_idx, square, &moving.token_ids, events)?;
        if pending {
            return Ok(());
        }
    }

    check_finish(state, player_idx, events);
    Ok(())
}

/// Resolve a move option id to its moving group, splitting a stack when
/// the option names a partial count (`stack_id:count`).
fn select_piece(
    state: &mut GameState,
    player_idx: usize,
    piece_id: &str,
    events: &mut Vec<GameEvent>,
) -> Result<MovingGroup, EngineError> {
    if let Some((stack_id, count)) = piece_id.rsplit_once(':') {
        if let Ok(count) = count.parse::<usize>() {
            return split_stack(state, player_idx, stack_id, count, events);
        }
    }

    let player = &state.players[player_idx];
    if let Some(stack) = player.stack(piece_id) {
        let first = stack
            .tokens
            .first()
            .and_then(|id| player.token(id))
            .ok_or_else(|| EngineError::internal("stack with no resolvable tokens"))?;
        return Ok(MovingGroup {
            token_ids: stack.tokens.clone(),
            from_state: first.state,
            from_progress: first.progress,
        });
    }

    let token = player
        .token(piece_id)
        .ok_or_else(|| EngineError::illegal_move(format!("unknown piece '{piece_id}'")))?;
    Ok(MovingGroup {
        token_ids: vec![token.token_id.clone()],
        from_state: token.state,
        from_progress: token.progress,
    })
}

fn split_stack(
    state: &mut GameState,
    player_idx: usize,
    stack_id: &str,
    count: usize,
    events: &mut Vec<GameEvent>,
) -> Result<MovingGroup, EngineError> {
    let player = &mut state.players[player_idx];
    let player_id = player.user_id;
    let position = player
        .stacks
        .iter()
        .position(|s| s.stack_id == stack_id)
        .ok_or_else(|| EngineError::illegal_move(format!("unknown stack '{stack_id}'")))?;

    let stack_tokens = player.stacks[position].tokens.clone();
    if count == 0 || count >= stack_tokens.len() {
        return Err(EngineError::illegal_move(format!(
            "cannot split {count} tokens from a stack of {}",
            stack_tokens.len()
        )));
    }

    let first = player
        .token(&stack_tokens[0])
        .ok_or_else(|| EngineError::internal("stack with no resolvable tokens"))?;
    let from_state = first.state;
    let from_progress = first.progress;

    let moving: Vec<String> = stack_tokens[..count].to_vec();
    let remaining: Vec<String> = stack_tokens[count..].to_vec();

    if remaining.len() >= 2 {
        player.stacks[position].tokens = remaining.clone();
    } else {
        player.stacks.remove(position);
        for token_id in &remaining {
            if let Some(token) = player.tokens.iter_mut().find(|t| &t.token_id == token_id) {
                token.in_stack = false;
            }
        }
    }

    let new_stack_id = if moving.len() >= 2 {
        let id = super::captures::next_stack_id(player);
        player.stacks.push(Stack {
            stack_id: id.clone(),
            tokens: moving.clone(),
        });
        Some(id)
    } else {
        for token_id in &moving {
            if let Some(token) = player.tokens.iter_mut().find(|t| &t.token_id == token_id) {
                token.in_stack = false;
            }
        }
        None
    };

    events.push(GameEvent::unsequenced(GameEventKind::StackSplit {
        player_id,
        stack_id: stack_id.to_string(),
        moving_token_ids: moving.clone(),
        remaining_token_ids: remaining,
        new_stack_id,
    }));

    Ok(MovingGroup {
        token_ids: moving,
        from_state,
        from_progress,
    })
}

/// Record a finished player and end the game when the ruleset says so.
pub(crate) fn check_finish(
    state: &mut GameState,
    player_idx: usize,
    events: &mut Vec<GameEvent>,
) {
    let user_id = state.players[player_idx].user_id;
    if !state.players[player_idx].finished() || state.rankings.contains(&user_id) {
        return;
    }

    state.rankings.push(user_id);
    let unfinished = state.players.iter().filter(|p| !p.finished()).count();
    if state.board.end_on_first_finish || unfinished <= 1 {
        super::finish_game(state, events);
    } else if let Some(turn) = state.turn.as_mut() {
        // The finisher forfeits the rest of their turn.
        turn.dice.clear();
        turn.extra_rolls = 0;
    }
}
