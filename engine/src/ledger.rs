use bitvec::prelude::*;

use crate::board::{Board, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Horizontal,
    Vertical,
    Ascending,
    Descending,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Horizontal,
        Orientation::Vertical,
        Orientation::Ascending,
        Orientation::Descending,
    ];

    // (row step, column step) from a window's anchor to its next cell
    fn step(self) -> (usize, isize) {
        match self {
            Orientation::Horizontal => (0, 1),
            Orientation::Vertical => (1, 0),
            Orientation::Ascending => (1, -1),
            Orientation::Descending => (1, 1),
        }
    }
}

/// A line of `run_length` cells, anchored at its lexicographically smallest cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub orientation: Orientation,
    pub row: usize,
    pub col: usize,
}

impl Window {
    pub fn cells(self, run_length: usize) -> impl Iterator<Item = (usize, usize)> {
        let (dr, dc) = self.orientation.step();
        (0..run_length).map(move |k| (self.row + k * dr, self.col.wrapping_add_signed(dc * k as isize)))
    }
}

// The anchors of one orientation form a height x width rectangle whose left
// edge is first_col. Windows are numbered lane by lane, row-major.
#[derive(Debug, Clone, Copy)]
struct Lane {
    orientation: Orientation,
    offset: usize,
    first_col: usize,
    height: usize,
    width: usize,
}

impl Lane {
    fn len(self) -> usize {
        self.height * self.width
    }

    fn index(self, row: isize, col: isize) -> Option<usize> {
        if row < 0 || col < self.first_col as isize {
            return None;
        }
        let (row, col) = (row as usize, col as usize - self.first_col);
        (row < self.height && col < self.width).then(|| self.offset + row * self.width + col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    rows: usize,
    cols: usize,
    run_length: usize,
}

impl Geometry {
    fn lanes(self) -> [Lane; 4] {
        let mut offset = 0;
        Orientation::ALL.map(|orientation| {
            let (dr, dc) = orientation.step();
            let height = if dr == 0 { self.rows } else { (self.rows + 1).saturating_sub(self.run_length) };
            let width = if dc == 0 { self.cols } else { (self.cols + 1).saturating_sub(self.run_length) };
            let first_col = if dc < 0 { self.run_length - 1 } else { 0 };
            let lane = Lane { orientation, offset, first_col, height, width };
            offset += lane.len();
            lane
        })
    }

    fn window_count(self) -> usize {
        self.lanes().iter().map(|lane| lane.len()).sum()
    }

    /// Indices of the windows covering (row, col), live or not.
    fn windows_through(self, row: usize, col: usize) -> impl Iterator<Item = usize> {
        let run_length = self.run_length;
        self.lanes().into_iter().flat_map(move |lane| {
            let (dr, dc) = lane.orientation.step();
            (0..run_length).filter_map(move |k| {
                lane.index(row as isize - (k * dr) as isize, col as isize - dc * k as isize)
            })
        })
    }

    fn index_of(self, window: Window) -> Option<usize> {
        self.lanes()[window.orientation as usize].index(window.row as isize, window.col as isize)
    }

    fn window(self, index: usize) -> Window {
        for lane in self.lanes() {
            if index < lane.offset + lane.len() {
                let local = index - lane.offset;
                return Window {
                    orientation: lane.orientation,
                    row: local / lane.width,
                    col: lane.first_col + local % lane.width,
                };
            }
        }
        panic!("window index {} out of range", index)
    }
}

/// Tracks the windows one player can still complete. A window scores
/// `run_length ^ pieces`, where `pieces` counts the owner's pieces inside it,
/// and the aggregate is the sum over all live windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLedger {
    geometry: Geometry,
    live: BitVec<u64, Lsb0>,
    pieces: Vec<u8>,
    aggregate: u64,
}

impl WindowLedger {
    pub fn new(rows: usize, cols: usize, run_length: usize) -> Self {
        let geometry = Geometry { rows, cols, run_length };
        let count = geometry.window_count();
        Self {
            geometry,
            live: bitvec![u64, Lsb0; 1; count],
            pieces: vec![0; count],
            aggregate: count as u64,
        }
    }

    /// Ledger for `owner` with every piece already on `board` accounted for.
    pub fn from_board(board: &Board, owner: Symbol) -> Self {
        let mut ledger = Self::new(board.rows(), board.cols(), board.run_length());
        for (row, col) in board.pieces(owner) {
            ledger.reinforce(row, col);
        }
        for (row, col) in board.pieces(owner.opponent()) {
            ledger.remove_broken_windows(row, col);
        }
        ledger
    }

    pub fn run_length(&self) -> usize {
        self.geometry.run_length
    }

    pub fn aggregate(&self) -> u64 {
        self.aggregate
    }

    pub fn live_count(&self) -> usize {
        self.live.count_ones()
    }

    /// Score of a live window, `None` once it has been broken.
    pub fn score(&self, window: Window) -> Option<u64> {
        let index = self.geometry.index_of(window)?;
        self.live[index].then(|| self.window_score(index))
    }

    pub fn windows(&self) -> impl Iterator<Item = (Window, u64)> + '_ {
        self.live
            .iter_ones()
            .map(move |index| (self.geometry.window(index), self.window_score(index)))
    }

    /// Recomputes the aggregate from scratch.
    pub fn window_sum(&self) -> u64 {
        self.live.iter_ones().map(|index| self.window_score(index)).sum()
    }

    fn window_score(&self, index: usize) -> u64 {
        (self.geometry.run_length as u64).pow(u32::from(self.pieces[index]))
    }

    /// An opponent piece landed on (row, col): every window through it is gone for good.
    pub fn remove_broken_windows(&mut self, row: usize, col: usize) {
        for index in self.geometry.windows_through(row, col) {
            if self.live[index] {
                self.live.set(index, false);
                self.aggregate -= self.window_score(index);
            }
        }
        debug_assert_eq!(self.aggregate, self.window_sum());
    }

    /// The owner placed a piece on (row, col).
    pub fn reinforce(&mut self, row: usize, col: usize) {
        let run_length = self.geometry.run_length as u64;
        for index in self.geometry.windows_through(row, col) {
            if self.live[index] {
                let score = self.window_score(index);
                self.pieces[index] += 1;
                self.aggregate += score * (run_length - 1);
            }
        }
        debug_assert_eq!(self.aggregate, self.window_sum());
    }
}
