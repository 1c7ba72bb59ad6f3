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

use rand::{Rng, RngCore};
use uuid::Uuid;

use super::events::{BonusReason, GameEvent, GameEventKind, TurnEndReason};
use super::{EngineError, current_player_index, current_turn, current_turn_mut, legal, movement};
use crate::game::{GameState, TurnPhase};

const CONSECUTIVE_SIXES_LIMIT: u8 = 3;

/// Draw one die from the injected RNG.
pub(crate) fn roll_die(rng: &mut impl Rng) -> u8 {
    (rng.next_u32() % 6) as u8 + 1
}

/// Process a `roll` action.
///
/// Rolls accumulate: a raw 6 immediately grants another roll and the
/// queued dice are only allocated to moves once a non-6 ends the rolling
/// run. A third consecutive 6 voids the whole run and ends the turn.
pub(crate) fn process_roll(
    state: &mut GameState,
    player_id: Uuid,
    rng: &mut impl Rng,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    let value = roll_die(rng);

    let turn = current_turn_mut(state)?;
    turn.dice.push(value);
    turn.history.push(value);
    let roll_number = turn.history.len() as u8;
    if value == 6 {
        turn.consecutive_sixes += 1;
    } else {
        turn.consecutive_sixes = 0;
    }

    if turn.consecutive_sixes >= CONSECUTIVE_SIXES_LIMIT {
        turn.dice.clear();
        events.push(GameEvent::unsequenced(GameEventKind::DiceRolled {
            player_id,
            value,
            roll_number,
            grants_bonus_roll: false,
        }));
        events.push(GameEvent::unsequenced(GameEventKind::ThreeSixesPenalty {
            player_id,
            rolls: vec![6, 6, 6],
        }));
        return super::rotate_turn(state, TurnEndReason::ThreeSixes, events);
    }

    events.push(GameEvent::unsequenced(GameEventKind::DiceRolled {
        player_id,
        value,
        roll_number,
        grants_bonus_roll: value == 6,
    }));

    if value == 6 {
        events.push(GameEvent::unsequenced(GameEventKind::BonusRollGranted {
            player_id,
            reason: BonusReason::RolledSix,
        }));
        state.turn_phase = TurnPhase::AwaitingRoll;
        return Ok(());
    }

    advance_allocation(state, events)
}

/// Allocate the head of the dice queue: end the turn when nothing can
/// move, auto-apply a forced move, or hand the choice to the player.
/// Loops because a forced move exposes the next queued die.
pub(crate) fn advance_allocation(
    state: &mut GameState,
    events: &mut Vec<GameEvent>,
) -> Result<(), EngineError> {
    loop {
        let player_idx = current_player_index(state)?;
        let turn = current_turn(state)?;
        let player_id = turn.user_id;

        let Some(&die) = turn.dice.first() else {
            let turn = current_turn_mut(state)?;
            if turn.extra_rolls > 0 {
                turn.extra_rolls -= 1;
                state.turn_phase = TurnPhase::AwaitingRoll;
                return Ok(());
            }
            return super::rotate_turn(state, TurnEndReason::AllRollsUsed, events);
        };

        let options = legal::legal_moves(&state.players[player_idx], die, &state.board);

        if options.is_empty() {
            events.push(GameEvent::unsequenced(GameEventKind::NoLegalMoves {
                player_id,
                die,
            }));
            return super::rotate_turn(state, TurnEndReason::NoLegalMoves, events);
        }

        if options.len() == 1 {
            movement::apply_move(state, &options[0], die, events)?;
            if state.turn_phase == TurnPhase::AwaitingCaptureChoice
                || state.phase == crate::game::GamePhase::Finished
            {
                return Ok(());
            }
            continue;
        }

        let turn = current_turn_mut(state)?;
        turn.legal_moves = options.clone();
        events.push(GameEvent::unsequenced(GameEventKind::MoveRequested {
            player_id,
            die,
            options,
        }));
        state.turn_phase = TurnPhase::AwaitingMove;
        return Ok(());
    }
}
