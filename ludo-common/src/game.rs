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

pub const ROAD_LENGTH: u8 = 52;
pub const HOMESTRETCH_LENGTH: u8 = 6;
pub const TOKENS_PER_PLAYER: usize = 4;
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

/// Entry square on the shared road for each seat, and the token colors
/// that go with them.
pub const SEAT_STARTING_SQUARES: [u8; 4] = [0, 13, 26, 39];
pub const SEAT_COLORS: [&str; 4] = ["red", "blue", "green", "yellow"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Hell,
    Road,
    Homestretch,
    Heaven,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    NotStarted,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingRoll,
    AwaitingMove,
    AwaitingCaptureChoice,
    Finished,
}

/// Ruleset configuration blob as stored on the room row. Unknown fields
/// are ignored so older rows keep deserializing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesetConfig {
    #[serde(default = "default_get_out_rolls")]
    pub get_out_rolls: Vec<u8>,
    #[serde(default = "default_shared_safe_squares")]
    pub shared_safe_squares: Vec<u8>,
    #[serde(default)]
    pub capture_choice_required: bool,
    #[serde(default = "default_end_on_first_finish")]
    pub end_on_first_finish: bool,
}

fn default_get_out_rolls() -> Vec<u8> {
    vec![6]
}

fn default_shared_safe_squares() -> Vec<u8> {
    vec![8, 21, 34, 47]
}

fn default_end_on_first_finish() -> bool {
    true
}

impl Default for RulesetConfig {
    fn default() -> Self {
        Self {
            get_out_rolls: default_get_out_rolls(),
            shared_safe_squares: default_shared_safe_squares(),
            capture_choice_required: false,
            end_on_first_finish: default_end_on_first_finish(),
        }
    }
}

/// Board geometry and rules derived from the ruleset config at game start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardSetup {
    pub road_length: u8,
    pub homestretch_length: u8,
    /// Absolute entry square on the road, indexed by seat.
    pub starting_squares: Vec<u8>,
    /// Absolute road squares where captures never occur.
    pub safe_squares: Vec<u8>,
    pub get_out_rolls: Vec<u8>,
    pub capture_choice_required: bool,
    pub end_on_first_finish: bool,
}

impl BoardSetup {
    pub fn from_config(config: &RulesetConfig) -> Self {
        let starting_squares = SEAT_STARTING_SQUARES.to_vec();
        let mut safe_squares = starting_squares.clone();
        for &square in &config.shared_safe_squares {
            if !safe_squares.contains(&square) {
                safe_squares.push(square);
            }
        }
        Self {
            road_length: ROAD_LENGTH,
            homestretch_length: HOMESTRETCH_LENGTH,
            starting_squares,
            safe_squares,
            get_out_rolls: config.get_out_rolls.clone(),
            capture_choice_required: config.capture_choice_required,
            end_on_first_finish: config.end_on_first_finish,
        }
    }

    /// Relative progress at which a token leaves the road for its lane.
    pub fn homestretch_entry(&self) -> u8 {
        self.road_length
    }

    /// Relative progress of the final lane square; landing exactly here
    /// sends the token to HEAVEN.
    pub fn win_progress(&self) -> u8 {
        self.road_length + self.homestretch_length - 1
    }

    pub fn is_safe(&self, square: u8) -> bool {
        self.safe_squares.contains(&square)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub token_id: String,
    pub state: TokenState,
    pub progress: u8,
    pub in_stack: bool,
}

/// A group of same-owner tokens at the same position, moved as one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stack {
    pub stack_id: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub display_name: String,
    pub color: String,
    /// 1-indexed position in the turn rotation.
    pub turn_order: u8,
    pub seat_index: u8,
    pub start_square: u8,
    pub tokens: Vec<Token>,
    pub stacks: Vec<Stack>,
}

impl PlayerState {
    pub fn token(&self, token_id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.token_id == token_id)
    }

    pub fn stack(&self, stack_id: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.stack_id == stack_id)
    }

    pub fn finished(&self) -> bool {
        self.tokens.iter().all(|t| t.state == TokenState::Heaven)
    }
}

/// One opponent group that could be captured on the landing square.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureTarget {
    pub piece_id: String,
    pub owner_id: Uuid,
    pub token_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingCapture {
    /// Absolute road square the mover landed on.
    pub position: u8,
    /// Token ids of the group that just moved.
    pub moving_token_ids: Vec<String>,
    pub targets: Vec<CaptureTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub user_id: Uuid,
    pub turn_order: u8,
    /// Queued dice not yet allocated to a move, oldest first.
    pub dice: Vec<u8>,
    /// Every value rolled this turn, in order.
    pub history: Vec<u8>,
    pub consecutive_sixes: u8,
    pub legal_moves: Vec<String>,
    /// Bonus rolls earned from captures, consumed once the queue drains.
    pub extra_rolls: u8,
    pub pending_capture: Option<PendingCapture>,
}

impl Turn {
    pub fn new(user_id: Uuid, turn_order: u8) -> Self {
        Self {
            user_id,
            turn_order,
            dice: Vec::new(),
            history: Vec::new(),
            consecutive_sixes: 0,
            legal_moves: Vec::new(),
            extra_rolls: 0,
            pending_capture: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub phase: GamePhase,
    pub turn_phase: TurnPhase,
    pub players: Vec<PlayerState>,
    pub board: BoardSetup,
    pub turn: Option<Turn>,
    /// Player ids in finishing order.
    pub rankings: Vec<Uuid>,
    /// Next sequence number stamped onto emitted events.
    pub event_seq: u64,
}

impl GameState {
    pub fn player(&self, user_id: Uuid) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_by_order(&self, turn_order: u8) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.turn_order == turn_order)
    }
}

/// A single game action fed to the engine over the wire as
/// `game_action{kind, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameAction {
    StartGame,
    Roll,
    Move {
        token_or_stack_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        die: Option<u8>,
    },
    CaptureChoice {
        target: String,
    },
}

/// Seat data needed to place one player into a new game.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSetup {
    pub user_id: Uuid,
    pub display_name: String,
    pub seat_index: u8,
}

fn initial_tokens(user_id: Uuid) -> Vec<Token> {
    (1..=TOKENS_PER_PLAYER)
        .map(|i| Token {
            token_id: format!("{user_id}_token_{i}"),
            state: TokenState::Hell,
            progress: 0,
            in_stack: false,
        })
        .collect()
}

/// Build the initial `GameState` for the given seated players. Turn order
/// follows seat order; the game is left in `not_started` until the engine
/// processes a `start_game` action.
pub fn initialize_game(
    players: &[PlayerSetup],
    config: &RulesetConfig,
) -> Result<GameState, String> {
    if players.len() < MIN_PLAYERS {
        return Err(format!(
            "at least {MIN_PLAYERS} players are required to start a game"
        ));
    }
    if players.len() > MAX_PLAYERS {
        return Err(format!("at most {MAX_PLAYERS} players are supported"));
    }

    let board = BoardSetup::from_config(config);

    let mut seen_users = Vec::new();
    let mut seen_seats = Vec::new();
    for player in players {
        if seen_users.contains(&player.user_id) {
            return Err(format!("duplicate player id {}", player.user_id));
        }
        if seen_seats.contains(&player.seat_index) {
            return Err(format!("duplicate seat index {}", player.seat_index));
        }
        if player.seat_index as usize >= MAX_PLAYERS {
            return Err(format!("seat index {} out of range", player.seat_index));
        }
        seen_users.push(player.user_id);
        seen_seats.push(player.seat_index);
    }

    let mut ordered: Vec<&PlayerSetup> = players.iter().collect();
    ordered.sort_by_key(|p| p.seat_index);

    let player_states = ordered
        .iter()
        .enumerate()
        .map(|(index, setup)| PlayerState {
            user_id: setup.user_id,
            display_name: setup.display_name.clone(),
            color: SEAT_COLORS[setup.seat_index as usize].to_string(),
            turn_order: index as u8 + 1,
            seat_index: setup.seat_index,
            start_square: board.starting_squares[setup.seat_index as usize],
            tokens: initial_tokens(setup.user_id),
            stacks: Vec::new(),
        })
        .collect();

    Ok(GameState {
        phase: GamePhase::NotStarted,
        turn_phase: TurnPhase::AwaitingRoll,
        players: player_states,
        board,
        turn: None,
        rankings: Vec::new(),
        event_seq: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(seat_index: u8) -> PlayerSetup {
        PlayerSetup {
            user_id: Uuid::new_v4(),
            display_name: format!("Player {}", seat_index + 1),
            seat_index,
        }
    }

    #[test]
    fn board_setup_derives_safe_and_win_squares() {
        let board = BoardSetup::from_config(&RulesetConfig::default());
        assert_eq!(board.road_length, 52);
        assert_eq!(board.homestretch_length, 6);
        assert_eq!(board.win_progress(), 57);
        assert_eq!(board.homestretch_entry(), 52);
        for square in [0, 13, 26, 39, 8, 21, 34, 47] {
            assert!(board.is_safe(square), "square {square} should be safe");
        }
        assert!(!board.is_safe(20));
    }

    #[test]
    fn initialize_game_seats_players_in_seat_order() {
        let players = vec![setup(2), setup(0)];
        let state = initialize_game(&players, &RulesetConfig::default()).unwrap();

        assert_eq!(state.phase, GamePhase::NotStarted);
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.players[0].seat_index, 0);
        assert_eq!(state.players[0].turn_order, 1);
        assert_eq!(state.players[0].start_square, 0);
        assert_eq!(state.players[0].color, "red");
        assert_eq!(state.players[1].seat_index, 2);
        assert_eq!(state.players[1].turn_order, 2);
        assert_eq!(state.players[1].start_square, 26);
        assert_eq!(state.players[1].color, "green");
    }

    #[test]
    fn initialize_game_gives_each_player_four_tokens_in_hell() {
        let players = vec![setup(0), setup(1), setup(2), setup(3)];
        let state = initialize_game(&players, &RulesetConfig::default()).unwrap();
        for player in &state.players {
            assert_eq!(player.tokens.len(), TOKENS_PER_PLAYER);
            for token in &player.tokens {
                assert_eq!(token.state, TokenState::Hell);
                assert_eq!(token.progress, 0);
                assert!(!token.in_stack);
            }
        }
    }

    #[test]
    fn initialize_game_rejects_too_few_players() {
        let players = vec![setup(0)];
        assert!(initialize_game(&players, &RulesetConfig::default()).is_err());
    }

    #[test]
    fn initialize_game_rejects_duplicate_seats() {
        let mut players = vec![setup(1), setup(1)];
        players[1].user_id = Uuid::new_v4();
        assert!(initialize_game(&players, &RulesetConfig::default()).is_err());
    }

    #[test]
    fn initialize_game_rejects_duplicate_users() {
        let a = setup(0);
        let mut b = setup(1);
        b.user_id = a.user_id;
        assert!(initialize_game(&[a, b], &RulesetConfig::default()).is_err());
    }

    #[test]
    fn ruleset_config_deserializes_from_sparse_blob() {
        let config: RulesetConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.get_out_rolls, vec![6]);
        assert_eq!(config.shared_safe_squares, vec![8, 21, 34, 47]);
        assert!(!config.capture_choice_required);
        assert!(config.end_on_first_finish);

        let config: RulesetConfig =
            serde_json::from_str(r#"{"get_out_rolls": [1, 6], "unknown_key": true}"#).unwrap();
        assert_eq!(config.get_out_rolls, vec![1, 6]);
    }

    #[test]
    fn game_action_uses_kind_tag() {
        let action: GameAction = serde_json::from_str(r#"{"kind": "roll"}"#).unwrap();
        assert_eq!(action, GameAction::Roll);

        let action: GameAction =
            serde_json::from_str(r#"{"kind": "move", "token_or_stack_id": "t1"}"#).unwrap();
        assert_eq!(
            action,
            GameAction::Move {
                token_or_stack_id: "t1".to_string(),
                die: None
            }
        );
    }
}
