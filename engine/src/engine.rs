use log::debug;

use crate::board::{Board, Symbol};
use crate::error::GameError;
use crate::tree::{GameTree, NodeId, HORIZON};

/// Score of a position from which pruning left the bot no move at all.
const LOST: i64 = i64::MIN;

/// Picks the bot's moves from a persistent game tree that follows the real
/// game. Columns are 1-indexed at this boundary.
pub struct Engine {
    tree: GameTree,
}

impl Engine {
    pub fn new(board: &Board, bot: Symbol) -> Self {
        Self {
            tree: GameTree::new(board, bot)
        }
    }

    pub fn bot(&self) -> Symbol {
        self.tree.bot()
    }

    pub fn tree(&self) -> &GameTree {
        &self.tree
    }

    /// Heuristic score of the current position, positive when it favours the bot.
    pub fn eval(&self) -> i64 {
        self.tree[self.tree.root()].score
    }

    /// Chooses the bot's next column, or `None` when the board is full.
    pub fn choose_move(&mut self) -> Option<usize> {
        let column = match self.obvious_move() {
            Some(column) => Some(column),
            None => {
                let root = self.tree.root();
                self.best_bot_move(root).and_then(|id| self.tree[id].column)
            }
        };
        if let Some(column) = column {
            debug!("engine chose column {} with eval {}", column + 1, self.eval());
        }
        column.map(|column| column + 1)
    }

    /// Keeps the tree in step with the real game. Must be called once after
    /// every move, whoever made it.
    pub fn advance_after_move(&mut self, column: usize) -> Result<(), GameError> {
        let column = column.checked_sub(1).ok_or(GameError::InvalidColumn(column))?;
        self.tree.advance(column)?;
        self.tree.extend_horizon();
        Ok(())
    }

    fn obvious_move(&mut self) -> Option<usize> {
        let root = self.tree.root();
        let children = self.tree.children(root).to_vec();
        match children.as_slice() {
            // every move loses: still take a win or block one, else play anything legal
            [] => {
                let board = &self.tree[root].board;
                let bot = self.tree.bot();
                board
                    .legal_columns()
                    .find(|&col| board.is_win(col, bot))
                    .or_else(|| board.legal_columns().find(|&col| board.is_win(col, bot.opponent())))
                    .or_else(|| board.legal_columns().next())
            }
            [only] => {
                let only = *only;
                if self.tree[only].board.is_full() {
                    self.tree.cache_score(only, 0);
                }
                self.tree[only].column
            }
            _ => children
                .iter()
                .find(|&&child| self.tree[child].bot_won)
                .and_then(|&child| self.tree[child].column),
        }
    }

    fn best_bot_move(&mut self, id: NodeId) -> Option<NodeId> {
        let children = self.tree.children(id).to_vec();
        let first = *children.first()?;
        if self.tree[first].board.is_full() {
            self.tree.cache_score(first, 0);
            return Some(first);
        }

        let mut best: Option<(NodeId, i64)> = None;
        for bot_move in children {
            let score = match self.best_user_move(bot_move) {
                Some(reply) => self.tree[reply].score,
                None => self.tree[bot_move].score,
            };
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((bot_move, score));
            }
        }
        let (bot_move, score) = best?;
        self.tree.cache_score(bot_move, score);
        Some(bot_move)
    }

    fn best_user_move(&mut self, id: NodeId) -> Option<NodeId> {
        let children = self.tree.children(id).to_vec();
        let first = *children.first()?;
        if self.tree[first].board.is_full() {
            self.tree.cache_score(first, 0);
            return Some(first);
        }
        if self.tree[id].depth + 1 == HORIZON {
            return children.into_iter().min_by_key(|&reply| self.tree[reply].score);
        }

        let mut worst: Option<(NodeId, i64)> = None;
        for user_move in children {
            let score = match self.best_bot_move(user_move) {
                Some(answer) => self.tree[answer].score,
                None => LOST,
            };
            if worst.map_or(true, |(_, low)| score < low) {
                worst = Some((user_move, score));
            }
        }
        let (user_move, score) = worst?;
        self.tree.cache_score(user_move, score);
        Some(user_move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(lines: &[&str], turn: Symbol) -> Board {
        Board::from_rows(lines, 4, turn).unwrap()
    }

    // whether the side to move can force a win within `plies` of its own and
    // the other side's moves, the other side moving in between
    fn can_force_win(board: &Board, plies: usize) -> bool {
        if plies == 0 {
            return false;
        }
        let attacker = board.turn();
        board.legal_columns().any(|col| {
            if board.is_win(col, attacker) {
                return true;
            }
            if plies < 3 {
                return false;
            }
            let after = board.make_move(col).unwrap();
            let replies: Vec<usize> = after.legal_columns().collect();
            !replies.is_empty()
                && replies.iter().all(|&reply| {
                    !after.is_win(reply, attacker.opponent())
                        && can_force_win(&after.make_move(reply).unwrap(), plies - 2)
                })
        })
    }

    #[test]
    fn test_blocks_three_open_at_both_ends() {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            "o.xxx.o",
        ], Symbol::O);
        let mut engine = Engine::new(&board, Symbol::O);
        assert!(engine.tree().children(engine.tree().root()).is_empty());
        assert_eq!(engine.choose_move(), Some(2));
    }

    #[test]
    fn test_blocks_after_a_played_out_opening() {
        let mut game = Board::default();
        let mut engine = Engine::new(&game, Symbol::O);
        for column in [3, 1, 4, 7, 5] {
            game = game.make_move(column - 1).unwrap();
            engine.advance_after_move(column).unwrap();
        }
        let expected = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            "o.xxx.o",
        ], Symbol::O);
        assert_eq!(game, expected);
        let column = engine.choose_move().unwrap();
        assert!(column == 2 || column == 6);
    }

    #[test]
    fn test_only_blocking_move_survives() {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            "..xxx..",
            "..oxoo.",
        ], Symbol::O);
        let mut engine = Engine::new(&board, Symbol::O);
        assert_eq!(engine.choose_move(), Some(6));
    }

    #[test]
    fn test_takes_immediate_win() {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            "xooo.xx",
        ], Symbol::O);
        let mut engine = Engine::new(&board, Symbol::O);
        assert_eq!(engine.choose_move(), Some(5));
    }

    #[test]
    fn test_last_cell_is_a_draw() {
        let board = board(&[
            "oxo.",
            "oxox",
            "xoxo",
            "xoxo",
        ], Symbol::X);
        let mut engine = Engine::new(&board, Symbol::X);
        assert_eq!(engine.choose_move(), Some(4));
        let root = engine.tree().root();
        let only = engine.tree().children(root)[0];
        assert!(engine.tree()[only].board.is_full());
        assert_eq!(engine.tree()[only].score, 0);
    }

    #[test]
    fn test_full_board_has_no_move() {
        let board = board(&[
            "oxox",
            "oxox",
            "xoxo",
            "xoxo",
        ], Symbol::O);
        let mut engine = Engine::new(&board, Symbol::O);
        assert_eq!(engine.choose_move(), None);
    }

    #[test]
    fn test_opening_move_is_not_a_forced_loss() {
        let board = Board::new(4, 4, 4, Symbol::X).unwrap();
        let mut engine = Engine::new(&board, Symbol::X);
        let column = engine.choose_move().unwrap();
        assert!((1..=4).contains(&column));
        let after = board.make_move(column - 1).unwrap();
        assert!(!can_force_win(&after, HORIZON - 1));
    }

    #[test]
    fn test_choose_move_is_idempotent() {
        let mut board = Board::new(5, 6, 4, Symbol::X).unwrap();
        let mut engine = Engine::new(&board, Symbol::O);
        for column in [3, 4] {
            board = board.make_move(column - 1).unwrap();
            engine.advance_after_move(column).unwrap();
        }
        board = board.make_move(2).unwrap();
        engine.advance_after_move(3).unwrap();
        assert_eq!(engine.tree()[engine.tree().root()].board, board);
        let first = engine.choose_move();
        assert_eq!(engine.choose_move(), first);
    }

    #[test]
    fn test_advance_after_move_rejects_column_zero() {
        let board = Board::new(4, 4, 4, Symbol::X).unwrap();
        let mut engine = Engine::new(&board, Symbol::X);
        assert_eq!(engine.advance_after_move(0), Err(GameError::InvalidColumn(0)));
        assert_eq!(engine.advance_after_move(5), Err(GameError::InvalidColumn(4)));
    }

    #[test]
    fn test_follows_a_whole_game() {
        let mut board = Board::new(4, 5, 4, Symbol::X).unwrap();
        let mut engine = Engine::new(&board, Symbol::O);
        loop {
            let column = if board.turn() == engine.bot() {
                engine.choose_move().unwrap()
            } else {
                board.legal_columns().next().unwrap() + 1
            };
            assert!(!board.is_col_full(column - 1));
            let won = board.is_win(column - 1, board.turn());
            board = board.make_move(column - 1).unwrap();
            if won || board.is_full() {
                break;
            }
            engine.advance_after_move(column).unwrap();
            assert_eq!(engine.tree()[engine.tree().root()].board, board);
        }
    }
}
