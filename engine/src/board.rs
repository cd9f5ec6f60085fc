use std::fmt;

use bitvec::{prelude::*, slice::IterOnes};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::GameError;

pub const MIN_SIZE: usize = 4;
pub const MAX_SIZE: usize = 9;
pub const MIN_RUN_LENGTH: usize = 4;
pub const DEFAULT_ROWS: usize = 6;
pub const DEFAULT_COLS: usize = 7;
pub const DEFAULT_RUN_LENGTH: usize = 4;

const B: usize = MAX_SIZE * MAX_SIZE;
pub type BitBoard = BitArr!(for B, in u64, Lsb0);
// one bit per cell, row-major with a fixed stride of MAX_SIZE
// row 0 is the top of the board, pieces fall towards the highest row

pub trait BitArr2D {
    fn empty() -> Self;
    fn get_point(&self, row: usize, col: usize) -> bool;
    fn set_point(&mut self, row: usize, col: usize, value: bool);
    type IterPoints<'a>: Iterator<Item=(usize, usize)> + 'a where Self: 'a;
    fn iter_set_points(&'_ self) -> Self::IterPoints<'_>;
}

fn to_point(idx: usize) -> (usize, usize) {
    (idx / MAX_SIZE, idx % MAX_SIZE)
}

impl BitArr2D for BitBoard {
    fn empty() -> Self {
        bitarr!(u64, Lsb0; 0; B)
    }

    fn get_point(&self, row: usize, col: usize) -> bool {
        self[row * MAX_SIZE + col]
    }

    fn set_point(&mut self, row: usize, col: usize, value: bool) {
        self.set(row * MAX_SIZE + col, value);
    }

    type IterPoints<'a> = std::iter::Map<IterOnes<'a, u64, Lsb0>, fn(usize) -> (usize, usize)>;

    fn iter_set_points(&'_ self) -> Self::IterPoints<'_> {
        self.iter_ones().map(to_point as fn(usize) -> (usize, usize))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbol {
    #[default]
    X,
    O,
}

impl Symbol {
    pub fn opponent(self) -> Self {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Symbol::X => 'x',
            Symbol::O => 'o',
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Checks the limits every board and configuration has to respect.
pub fn validate_dimensions(rows: usize, cols: usize, run_length: usize) -> Result<(), GameError> {
    let size_range = MIN_SIZE..=MAX_SIZE;
    if !size_range.contains(&rows) || !size_range.contains(&cols) {
        return Err(GameError::InvalidDimensions { rows, cols });
    }
    let max = rows.max(cols);
    if run_length < MIN_RUN_LENGTH || run_length > max {
        return Err(GameError::InvalidRunLength { run_length, max });
    }
    Ok(())
}

// (row step, column step) for horizontal, vertical and both diagonals
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, -1), (1, 1)];

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Board {
    rows: usize,
    cols: usize,
    run_length: usize,
    x_squares: BitBoard,
    o_squares: BitBoard,
    turn: Symbol,
}

impl Board {
    pub fn new(rows: usize, cols: usize, run_length: usize, first: Symbol) -> Result<Self, GameError> {
        validate_dimensions(rows, cols, run_length)?;
        Ok(Self {
            rows,
            cols,
            run_length,
            x_squares: BitBoard::empty(),
            o_squares: BitBoard::empty(),
            turn: first,
        })
    }

    /// Parses a picture of a position, top row first. `x`/`o` are pieces,
    /// `.` or a space is an empty cell.
    pub fn from_rows(lines: &[&str], run_length: usize, turn: Symbol) -> Result<Self, GameError> {
        let cols = lines.first().map_or(0, |line| line.chars().count());
        let mut board = Self::new(lines.len(), cols, run_length, turn)?;
        for (row, line) in lines.iter().enumerate() {
            if line.chars().count() != cols {
                return Err(GameError::RaggedRows);
            }
            for (col, c) in line.chars().enumerate() {
                let symbol = match c {
                    'x' | 'X' => Symbol::X,
                    'o' | 'O' => Symbol::O,
                    '.' | ' ' => continue,
                    other => return Err(GameError::InvalidCell(other)),
                };
                board.squares_mut(symbol).set_point(row, col, true);
            }
        }
        for row in 0..board.rows - 1 {
            for col in 0..board.cols {
                if board.occupied(row, col) && !board.occupied(row + 1, col) {
                    return Err(GameError::FloatingPiece { row, col });
                }
            }
        }
        Ok(board)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn run_length(&self) -> usize {
        self.run_length
    }

    /// The side to move.
    pub fn turn(&self) -> Symbol {
        self.turn
    }

    pub fn squares(&self, symbol: Symbol) -> &BitBoard {
        match symbol {
            Symbol::X => &self.x_squares,
            Symbol::O => &self.o_squares,
        }
    }

    fn squares_mut(&mut self, symbol: Symbol) -> &mut BitBoard {
        match symbol {
            Symbol::X => &mut self.x_squares,
            Symbol::O => &mut self.o_squares,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Symbol> {
        if self.x_squares.get_point(row, col) {
            Some(Symbol::X)
        } else if self.o_squares.get_point(row, col) {
            Some(Symbol::O)
        } else {
            None
        }
    }

    fn occupied(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_some()
    }

    /// Row a piece dropped into `col` would land in.
    pub fn drop_row(&self, col: usize) -> Option<usize> {
        if col >= self.cols {
            return None;
        }
        (0..self.rows).rev().find(|&row| !self.occupied(row, col))
    }

    pub fn is_col_full(&self, col: usize) -> bool {
        col >= self.cols || self.occupied(0, col)
    }

    pub fn is_full(&self) -> bool {
        (0..self.cols).all(|col| self.is_col_full(col))
    }

    pub fn legal_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.cols).filter(move |&col| !self.is_col_full(col))
    }

    pub fn pieces(&self, symbol: Symbol) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.squares(symbol).iter_set_points()
    }

    pub fn piece_count(&self) -> usize {
        self.x_squares.count_ones() + self.o_squares.count_ones()
    }

    /// Whether `player` dropping a piece into `col` would complete a run.
    pub fn is_win(&self, col: usize, player: Symbol) -> bool {
        let Some(row) = self.drop_row(col) else {
            return false;
        };
        DIRECTIONS.iter().any(|&(dr, dc)| {
            1 + self.count_run(row, col, dr, dc, player) + self.count_run(row, col, -dr, -dc, player)
                >= self.run_length
        })
    }

    // player's pieces adjacent to (row, col) in one direction, the cell itself excluded
    fn count_run(&self, row: usize, col: usize, dr: isize, dc: isize, player: Symbol) -> usize {
        let mut count = 0;
        let (mut r, mut c) = (row, col);
        while count + 1 < self.run_length {
            match (r.checked_add_signed(dr), c.checked_add_signed(dc)) {
                (Some(next_r), Some(next_c))
                    if next_r < self.rows && next_c < self.cols && self.get(next_r, next_c) == Some(player) =>
                {
                    count += 1;
                    r = next_r;
                    c = next_c;
                }
                _ => break,
            }
        }
        count
    }

    /// Returns the position after the side to move drops a piece into `col`.
    pub fn make_move(&self, col: usize) -> Result<Self, GameError> {
        if col >= self.cols {
            return Err(GameError::InvalidColumn(col));
        }
        let row = self.drop_row(col).ok_or(GameError::ColumnFull(col))?;
        let mut board = self.clone();
        board.squares_mut(self.turn).set_point(row, col, true);
        board.turn = self.turn.opponent();
        Ok(board)
    }

    fn row_string(&self, row: usize) -> String {
        (0..self.cols)
            .map(|col| self.get(row, col).map_or(' ', Symbol::as_char))
            .collect()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            run_length: DEFAULT_RUN_LENGTH,
            x_squares: BitBoard::empty(),
            o_squares: BitBoard::empty(),
            turn: Symbol::default(),
        }
    }
}

impl Serialize for Board {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        let cells: Vec<String> = (0..self.rows).map(|row| self.row_string(row)).collect();
        let mut s = serializer.serialize_struct("Board", 5)?;
        s.serialize_field("rows", &self.rows)?;
        s.serialize_field("cols", &self.cols)?;
        s.serialize_field("run_length", &self.run_length)?;
        s.serialize_field("turn", &self.turn)?;
        s.serialize_field("cells", &cells)?;
        s.end()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            writeln!(f, "|{}|", self.row_string(row))?;
        }
        let labels: String = (1..=self.cols).map(|col| char::from_digit(col as u32, 10).unwrap_or('?')).collect();
        write!(f, " {} ", labels)
    }
}
