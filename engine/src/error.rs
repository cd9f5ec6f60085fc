use std::io::{Error, ErrorKind};

/// Errors raised by the rules engine and game setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("board must have 4 to 9 rows and columns, got {rows}x{cols}")]
    InvalidDimensions { rows: usize, cols: usize },

    #[error("run length must be between 4 and {max}, got {run_length}")]
    InvalidRunLength { run_length: usize, max: usize },

    #[error("column {0} does not exist")]
    InvalidColumn(usize),

    #[error("column {0} is full")]
    ColumnFull(usize),

    #[error("unexpected character {0:?} in board picture")]
    InvalidCell(char),

    #[error("board picture rows have different lengths")]
    RaggedRows,

    #[error("piece at row {row}, column {col} is floating")]
    FloatingPiece { row: usize, col: usize },

    #[error("game has not started yet")]
    GameNotStarted,

    #[error("game is already over")]
    GameOver,
}

impl From<GameError> for Error {
    fn from(err: GameError) -> Self {
        Error::new(ErrorKind::InvalidInput, err)
    }
}
