use serde::{Deserialize, Serialize};

use crate::board::{validate_dimensions, Board, Symbol, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_RUN_LENGTH};
use crate::error::GameError;

/// Settings a client sends to start a game. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub rows: usize,
    pub cols: usize,
    pub run_length: usize,
    /// The human player's symbol.
    pub player: Symbol,
    pub player_first: bool,
    /// When false both symbols are played by humans.
    pub versus_bot: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            run_length: DEFAULT_RUN_LENGTH,
            player: Symbol::X,
            player_first: true,
            versus_bot: true,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), GameError> {
        validate_dimensions(self.rows, self.cols, self.run_length)
    }

    pub fn bot(&self) -> Symbol {
        self.player.opponent()
    }

    /// Empty board with the opening side to move.
    pub fn new_board(&self) -> Result<Board, GameError> {
        let first = if self.player_first { self.player } else { self.bot() };
        Board::new(self.rows, self.cols, self.run_length, first)
    }
}
