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

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::TokenState;

/// Why a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnEndReason {
    ThreeSixes,
    NoLegalMoves,
    AllRollsUsed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BonusReason {
    RolledSix,
    Capture,
}

/// A single observable game event. Events are the only output clients see;
/// state mutations stay private to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    /// Monotonically increasing per game, stamped by `process_action`.
    pub seq: u64,
    #[serde(flatten)]
    pub kind: GameEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEventKind {
    GameStarted {
        player_order: Vec<Uuid>,
        first_player_id: Uuid,
    },
    TurnStarted {
        player_id: Uuid,
        turn_number: u8,
    },
    RollGranted {
        player_id: Uuid,
    },
    DiceRolled {
        player_id: Uuid,
        value: u8,
        /// Which roll within this turn (1, 2, 3...).
        roll_number: u8,
        grants_bonus_roll: bool,
    },
    ThreeSixesPenalty {
        player_id: Uuid,
        rolls: Vec<u8>,
    },
    NoLegalMoves {
        player_id: Uuid,
        die: u8,
    },
    MoveRequested {
        player_id: Uuid,
        die: u8,
        options: Vec<String>,
    },
    TokenMoved {
        player_id: Uuid,
        token_ids: Vec<String>,
        from_state: TokenState,
        to_state: TokenState,
        from_progress: u8,
        to_progress: u8,
        die: u8,
        effective_roll: u8,
    },
    StackSplit {
        player_id: Uuid,
        stack_id: String,
        moving_token_ids: Vec<String>,
        remaining_token_ids: Vec<String>,
        new_stack_id: Option<String>,
    },
    StackMerged {
        player_id: Uuid,
        stack_id: String,
        token_ids: Vec<String>,
        position: u8,
    },
    CaptureChoiceRequested {
        player_id: Uuid,
        options: Vec<String>,
    },
    CaptureOccurred {
        capturing_player_id: Uuid,
        captured_player_id: Uuid,
        token_ids: Vec<String>,
        position: u8,
        grants_bonus_roll: bool,
    },
    TokenReachedHeaven {
        player_id: Uuid,
        token_id: String,
    },
    BonusRollGranted {
        player_id: Uuid,
        reason: BonusReason,
    },
    TurnEnded {
        player_id: Uuid,
        reason: TurnEndReason,
        next_player_id: Option<Uuid>,
    },
    GameEnded {
        winner_id: Uuid,
        rankings: Vec<Uuid>,
    },
}

impl GameEvent {
    pub fn unsequenced(kind: GameEventKind) -> Self {
        Self { seq: 0, kind }
    }
}
