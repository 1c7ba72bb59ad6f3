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

use crate::game::{BoardSetup, PlayerState, TokenState};

/// Effective distance a group of `height` tokens moves for a raw die.
/// A result of zero means the group cannot move with that die.
pub fn effective_roll(raw: u8, height: u8) -> u8 {
    if height == 0 { 0 } else { raw / height }
}

/// Enumerate every legal move for `player` given one die.
///
/// Option ids are token ids, stack ids (move the whole stack), or
/// `stack_id:count` (split `count` tokens off and move them). Splits are
/// offered for every count with a positive effective roll that stays on
/// the board, so any legal non-trivial subset is always an alternative.
pub fn legal_moves(player: &PlayerState, die: u8, board: &BoardSetup) -> Vec<String> {
    let win = board.win_progress();
    let mut options = Vec::new();

    for token in &player.tokens {
        if token.in_stack {
            continue;
        }
        match token.state {
            TokenState::Hell => {
                if board.get_out_rolls.contains(&die) {
                    options.push(token.token_id.clone());
                }
            }
            TokenState::Road | TokenState::Homestretch => {
                if token.progress + die <= win {
                    options.push(token.token_id.clone());
                }
            }
            TokenState::Heaven => {}
        }
    }

    for stack in &player.stacks {
        let Some(first) = stack.tokens.first().and_then(|id| player.token(id)) else {
            continue;
        };
        if !matches!(first.state, TokenState::Road | TokenState::Homestretch) {
            continue;
        }
        let height = stack.tokens.len() as u8;
        for count in 1..=height {
            let effective = effective_roll(die, count);
            if effective == 0 {
                continue;
            }
            if first.progress + effective <= win {
                if count == height {
                    options.push(stack.stack_id.clone());
                } else {
                    options.push(format!("{}:{}", stack.stack_id, count));
                }
            }
        }
    }

    options
}

pub fn has_any_legal_moves(player: &PlayerState, die: u8, board: &BoardSetup) -> bool {
    !legal_moves(player, die, board).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{RulesetConfig, Stack, Token};
    use uuid::Uuid;

    fn token(id: &str, state: TokenState, progress: u8, in_stack: bool) -> Token {
        Token {
            token_id: id.to_string(),
            state,
            progress,
            in_stack,
        }
    }

    fn player(tokens: Vec<Token>, stacks: Vec<Stack>) -> PlayerState {
        PlayerState {
            user_id: Uuid::new_v4(),
            display_name: "Player 1".to_string(),
            color: "red".to_string(),
            turn_order: 1,
            seat_index: 0,
            start_square: 0,
            tokens,
            stacks,
        }
    }

    fn board() -> BoardSetup {
        BoardSetup::from_config(&RulesetConfig::default())
    }

    #[test]
    fn effective_roll_is_floor_division() {
        assert_eq!(effective_roll(6, 1), 6);
        assert_eq!(effective_roll(5, 2), 2);
        assert_eq!(effective_roll(3, 2), 1);
        assert_eq!(effective_roll(1, 2), 0);
        assert_eq!(effective_roll(6, 4), 1);
    }

    #[test]
    fn hell_tokens_need_a_get_out_roll() {
        let p = player(
            vec![
                token("t1", TokenState::Hell, 0, false),
                token("t2", TokenState::Road, 10, false),
            ],
            vec![],
        );
        let with_six = legal_moves(&p, 6, &board());
        assert!(with_six.contains(&"t1".to_string()));
        assert!(with_six.contains(&"t2".to_string()));

        let with_three = legal_moves(&p, 3, &board());
        assert!(!with_three.contains(&"t1".to_string()));
        assert!(with_three.contains(&"t2".to_string()));
    }

    #[test]
    fn heaven_tokens_are_never_offered() {
        let p = player(
            vec![
                token("t1", TokenState::Heaven, 57, false),
                token("t2", TokenState::Road, 10, false),
            ],
            vec![],
        );
        let moves = legal_moves(&p, 3, &board());
        assert!(!moves.contains(&"t1".to_string()));
        assert!(moves.contains(&"t2".to_string()));
    }

    #[test]
    fn homestretch_overshoot_is_not_offered() {
        let p = player(vec![token("t1", TokenState::Homestretch, 55, false)], vec![]);
        // 55 + 3 would pass the final lane square (57).
        assert!(legal_moves(&p, 3, &board()).is_empty());
        // Exact landing is legal.
        assert!(legal_moves(&p, 2, &board()).contains(&"t1".to_string()));
    }

    #[test]
    fn stack_options_include_full_and_partial_moves() {
        let p = player(
            vec![
                token("t1", TokenState::Road, 10, true),
                token("t2", TokenState::Road, 10, true),
            ],
            vec![Stack {
                stack_id: "s1".to_string(),
                tokens: vec!["t1".to_string(), "t2".to_string()],
            }],
        );
        let moves = legal_moves(&p, 5, &board());
        // Full stack: floor(5/2) = 2. One token: 5.
        assert!(moves.contains(&"s1".to_string()));
        assert!(moves.contains(&"s1:1".to_string()));
    }

    #[test]
    fn immobile_stack_heights_are_skipped() {
        let tokens = (1..=4)
            .map(|i| token(&format!("t{i}"), TokenState::Road, 10, true))
            .collect();
        let p = player(
            tokens,
            vec![Stack {
                stack_id: "s1".to_string(),
                tokens: (1..=4).map(|i| format!("t{i}")).collect(),
            }],
        );
        let moves = legal_moves(&p, 3, &board());
        // floor(3/4) = 0: the full stack cannot move with a 3.
        assert!(!moves.contains(&"s1".to_string()));
        assert!(moves.contains(&"s1:1".to_string()));
        assert!(moves.contains(&"s1:2".to_string()));
        assert!(moves.contains(&"s1:3".to_string()));
    }

    #[test]
    fn stacked_tokens_are_not_offered_individually() {
        let p = player(
            vec![
                token("t1", TokenState::Road, 10, true),
                token("t2", TokenState::Road, 10, true),
            ],
            vec![Stack {
                stack_id: "s1".to_string(),
                tokens: vec!["t1".to_string(), "t2".to_string()],
            }],
        );
        let moves = legal_moves(&p, 4, &board());
        assert!(!moves.contains(&"t1".to_string()));
        assert!(!moves.contains(&"t2".to_string()));
    }
}
