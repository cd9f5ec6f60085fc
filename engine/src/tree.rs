use std::ops::Index;

use log::{debug, trace};

use crate::board::{Board, Symbol};
use crate::error::GameError;
use crate::ledger::WindowLedger;

/// Plies looked ahead from the current position.
pub const HORIZON: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One hypothetical position, reached by dropping a piece into `column`.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Plies between the current real position and this one.
    pub depth: usize,
    pub column: Option<usize>,
    pub board: Board,
    pub bot_windows: WindowLedger,
    pub user_windows: WindowLedger,
    /// Bot aggregate minus user aggregate, overwritten by the search with the
    /// value it propagates up to this node.
    pub score: i64,
    pub bot_won: bool,
    pub user_won: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    detached: bool,
}

impl Simulation {
    /// The player whose move produced this position.
    pub fn mover(&self) -> Symbol {
        self.board.turn().opponent()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

fn signed_score(bot_windows: &WindowLedger, user_windows: &WindowLedger) -> i64 {
    bot_windows.aggregate() as i64 - user_windows.aggregate() as i64
}

/// Persistent game tree rooted at the real position. Nodes live in an arena;
/// a discarded subtree is detached from its parent immediately and its slots
/// are recycled once the operation that discarded it has finished.
pub struct GameTree {
    slots: Vec<Option<Simulation>>,
    vacant: Vec<NodeId>,
    graveyard: Vec<NodeId>,
    root: NodeId,
    bot: Symbol,
}

impl GameTree {
    pub fn new(board: &Board, bot: Symbol) -> Self {
        let bot_windows = WindowLedger::from_board(board, bot);
        let user_windows = WindowLedger::from_board(board, bot.opponent());
        let root = Simulation {
            depth: 0,
            column: None,
            board: board.clone(),
            score: signed_score(&bot_windows, &user_windows),
            bot_windows,
            user_windows,
            bot_won: false,
            user_won: false,
            parent: None,
            children: Vec::new(),
            detached: false,
        };
        let mut tree = Self {
            slots: vec![Some(root)],
            vacant: Vec::new(),
            graveyard: Vec::new(),
            root: NodeId(0),
            bot,
        };
        if !board.is_full() {
            tree.populate(tree.root);
            // a seeded position may already offer the opponent a win
            if tree[tree.root].mover() != bot {
                tree.discard_bad_children(tree.root);
            }
        }
        tree.release_discarded();
        debug!("built game tree for {} with {} nodes", bot, tree.len());
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn bot(&self) -> Symbol {
        self.bot
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self[id].children
    }

    /// Number of nodes currently held by the arena.
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    pub fn cache_score(&mut self, id: NodeId, score: i64) {
        self.node_mut(id).score = score;
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Simulation {
        match &mut self.slots[id.0] {
            Some(node) => node,
            None => panic!("node {:?} has been released", id),
        }
    }

    fn alloc(&mut self, node: Simulation) -> NodeId {
        match self.vacant.pop() {
            Some(id) => {
                self.slots[id.0] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn ancestor(&self, id: NodeId, generations: usize) -> Option<NodeId> {
        (0..generations).try_fold(id, |node, _| self[node].parent)
    }

    fn child_for(&self, id: NodeId, column: usize) -> Option<NodeId> {
        self[id].children.iter().copied().find(|&child| self[child].column == Some(column))
    }

    fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = id;
        loop {
            let node = &self[cursor];
            if node.detached {
                return false;
            }
            match node.parent {
                Some(parent) => cursor = parent,
                None => return cursor == self.root,
            }
        }
    }

    /// Adds one child per legal column, each grown down to the horizon.
    fn populate(&mut self, id: NodeId) {
        let board = &self[id].board;
        let moves: Vec<(usize, usize, Board)> = board
            .legal_columns()
            .filter_map(|col| {
                let row = board.drop_row(col)?;
                board.make_move(col).ok().map(|next| (col, row, next))
            })
            .collect();
        for (column, row, next) in moves {
            let child = self.spawn(id, column, row, next);
            self.node_mut(id).children.push(child);
        }
    }

    // Recursion here is bounded by the horizon.
    fn spawn(&mut self, parent: NodeId, column: usize, row: usize, board: Board) -> NodeId {
        let prior = &self[parent];
        let mover = prior.board.turn();
        let completes_run = prior.board.is_win(column, mover);
        let depth = prior.depth + 1;
        let bot_won = prior.bot_won || (mover == self.bot && completes_run);
        let user_won = prior.user_won || (mover != self.bot && completes_run);
        let mut bot_windows = prior.bot_windows.clone();
        let mut user_windows = prior.user_windows.clone();
        if mover == self.bot {
            bot_windows.reinforce(row, column);
            user_windows.remove_broken_windows(row, column);
        } else {
            user_windows.reinforce(row, column);
            bot_windows.remove_broken_windows(row, column);
        }

        let expand = depth < HORIZON && !board.is_full();
        let id = self.alloc(Simulation {
            depth,
            column: Some(column),
            board,
            score: signed_score(&bot_windows, &user_windows),
            bot_windows,
            user_windows,
            bot_won,
            user_won,
            parent: Some(parent),
            children: Vec::new(),
            detached: false,
        });
        if expand {
            self.populate(id);
            if mover != self.bot {
                self.discard_bad_children(id);
            }
        }
        id
    }

    fn discard(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        if node.detached {
            return;
        }
        node.detached = true;
        let parent = node.parent;
        trace!("discarding column {:?} at depth {}", node.column, node.depth);
        if let Some(parent) = parent {
            let siblings = &mut self.node_mut(parent).children;
            if let Some(pos) = siblings.iter().position(|&child| child == id) {
                siblings.remove(pos);
            }
        }
        self.graveyard.push(id);
    }

    fn release_discarded(&mut self) {
        let mut stack = std::mem::take(&mut self.graveyard);
        let mut released = 0;
        while let Some(id) = stack.pop() {
            if let Some(node) = self.slots[id.0].take() {
                stack.extend(node.children);
                self.vacant.push(id);
                released += 1;
            }
        }
        if released > 0 {
            trace!("released {} nodes", released);
        }
    }

    // Pruning only ever removes bot moves: `id` is a node after which the bot
    // is to move.

    fn discard_bad_children(&mut self, id: NodeId) {
        self.discard_if_loss_certain(id);
        self.discard_if_impasse(id, HORIZON - 3);
        self.discard_others_if_win_found(id);
    }

    /// Drops bot moves that leave the user an immediate win.
    fn discard_if_loss_certain(&mut self, id: NodeId) {
        for bot_move in self[id].children.clone() {
            let candidate = &self[bot_move];
            if !candidate.bot_won && candidate.children.iter().any(|&reply| self[reply].user_won) {
                self.discard(bot_move);
            }
        }
    }

    /// Drops bot moves after which some user reply is a dead end: not a full
    /// board, yet nothing survived below it.
    fn discard_if_impasse(&mut self, id: NodeId, depth_limit: usize) {
        if self[id].depth >= depth_limit {
            return;
        }
        for bot_move in self[id].children.clone() {
            let candidate = &self[bot_move];
            let dead_end = candidate.children.iter().any(|&reply| {
                let reply = &self[reply];
                !reply.board.is_full() && reply.children.is_empty()
            });
            if !candidate.bot_won && dead_end {
                self.discard(bot_move);
            }
        }
    }

    /// Keeps only the first bot move that wins against every reply. Moves
    /// that already won stay as well.
    fn discard_others_if_win_found(&mut self, id: NodeId) {
        for bot_move in self[id].children.clone() {
            let candidate = &self[bot_move];
            if candidate.detached || candidate.bot_won {
                continue;
            }
            if self.is_win_certain(bot_move) {
                let alternatives: Vec<NodeId> = self[id]
                    .children
                    .iter()
                    .copied()
                    .filter(|&child| child != bot_move && !self[child].bot_won)
                    .collect();
                for alternative in alternatives {
                    self.discard(alternative);
                }
            }
        }
    }

    // every user reply can be answered with a bot win
    fn is_win_certain(&self, id: NodeId) -> bool {
        let node = &self[id];
        node.depth + 2 <= HORIZON
            && !node.children.is_empty()
            && node.children.iter().all(|&reply| {
                self[reply].children.iter().any(|&answer| self[answer].bot_won)
            })
    }

    fn discard_impasses_upwards(&mut self, start: NodeId) {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let depth = self[id].depth;
            if depth >= HORIZON - 2 {
                break;
            }
            self.discard_if_impasse(id, HORIZON - 2);
            cursor = if depth > 1 { self.ancestor(id, 2) } else { None };
        }
    }

    // A freshly expanded node one ply above the horizon lets the pruning
    // heuristics above it see further than they could when they first ran.
    fn discard_with_new_information(&mut self, id: NodeId) {
        if self[id].mover() != self.bot {
            if let Some(grandparent) = self.ancestor(id, 2) {
                self.discard_others_if_win_found(grandparent);
            }
        } else {
            if let Some(parent) = self.ancestor(id, 1) {
                self.discard_if_loss_certain(parent);
            }
            if let Some(start) = self.ancestor(id, 3) {
                self.discard_impasses_upwards(start);
            }
        }
    }

    /// Re-roots the tree at the position reached by dropping into `column`.
    pub fn advance(&mut self, column: usize) -> Result<(), GameError> {
        let root = self.root;
        let next_board = self[root].board.make_move(column)?;
        let next = match self.child_for(root, column) {
            Some(child) => child,
            None => {
                // the move had been pruned: grow it again from the current root
                debug!("column {} has no surviving node, growing it from the root", column);
                let row = self[root].board.drop_row(column).ok_or(GameError::ColumnFull(column))?;
                self.spawn(root, column, row, next_board)
            }
        };

        self.node_mut(root).children.retain(|&child| child != next);
        self.graveyard.push(root);
        self.node_mut(next).parent = None;
        self.root = next;

        let mut stack = vec![next];
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id);
            node.depth -= 1;
            stack.extend(node.children.iter().copied());
        }
        self.release_discarded();
        debug!("advanced to column {}, {} nodes kept", column, self.len());
        Ok(())
    }

    /// Expands the nodes one ply above the horizon, then re-runs the pruning
    /// that the new plies inform.
    pub fn extend_horizon(&mut self) {
        let mut frontier = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self[id];
            if node.depth + 1 == HORIZON {
                frontier.push(id);
            } else if node.depth + 1 < HORIZON {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        for id in frontier {
            let node = &self[id];
            if !node.children.is_empty() || node.board.is_full() || !self.is_attached(id) {
                continue;
            }
            self.populate(id);
            self.discard_with_new_information(id);
        }
        self.release_discarded();
        debug!("extended horizon, tree holds {} nodes", self.len());
    }
}

impl Index<NodeId> for GameTree {
    type Output = Simulation;

    fn index(&self, id: NodeId) -> &Simulation {
        match &self.slots[id.0] {
            Some(node) => node,
            None => panic!("node {:?} has been released", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(lines: &[&str], turn: Symbol) -> Board {
        Board::from_rows(lines, 4, turn).unwrap()
    }

    fn columns(tree: &GameTree, id: NodeId) -> Vec<usize> {
        tree.children(id).iter().filter_map(|&child| tree[child].column).collect()
    }

    // walks the reachable tree, checking structure, and returns its size
    fn check_structure(tree: &GameTree) -> usize {
        let mut count = 0;
        let mut stack = vec![(tree.root(), 0)];
        while let Some((id, distance)) = stack.pop() {
            let node = &tree[id];
            count += 1;
            assert_eq!(node.depth, distance);
            assert!(node.depth <= HORIZON);
            assert!(!node.detached);
            assert_eq!(node.bot_windows.aggregate(), node.bot_windows.window_sum());
            assert_eq!(node.user_windows.aggregate(), node.user_windows.window_sum());
            for &child in node.children() {
                assert_eq!(tree[child].parent(), Some(id));
                stack.push((child, distance + 1));
            }
        }
        count
    }

    fn descend(tree: &GameTree, path: &[usize]) -> NodeId {
        path.iter().fold(tree.root(), |id, &column| tree.child_for(id, column).unwrap())
    }

    fn max_depth(tree: &GameTree) -> usize {
        let mut deepest = 0;
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            deepest = deepest.max(tree[id].depth);
            stack.extend(tree.children(id).iter().copied());
        }
        deepest
    }

    #[test]
    fn test_root_of_empty_board() {
        let board = Board::new(4, 4, 4, Symbol::X).unwrap();
        let tree = GameTree::new(&board, Symbol::O);
        let root = &tree[tree.root()];
        assert_eq!(root.depth, 0);
        assert_eq!(root.score, 0);
        assert_eq!(root.mover(), Symbol::O);
        assert_eq!(columns(&tree, tree.root()), vec![0, 1, 2, 3]);
        assert_eq!(max_depth(&tree), HORIZON);
        assert_eq!(check_structure(&tree), tree.len());
    }

    #[test]
    fn test_child_scores_follow_ledgers() {
        let board = Board::new(4, 5, 4, Symbol::X).unwrap();
        let tree = GameTree::new(&board, Symbol::X);
        let root = tree.root();
        for &child in tree.children(root) {
            let node = &tree[child];
            assert_eq!(node.mover(), Symbol::X);
            assert!(node.score > 0);
            assert_eq!(node.score, node.bot_windows.aggregate() as i64 - node.user_windows.aggregate() as i64);
            for &reply in tree.children(child) {
                assert!(tree[reply].score < node.score + 1);
            }
        }
    }

    #[test]
    fn test_win_flags_are_inherited() {
        let board = board(&[
            "....",
            "x...",
            "x...",
            "xoo.",
        ], Symbol::X);
        let tree = GameTree::new(&board, Symbol::O);
        let root = tree.root();
        let winning = tree.children(root).iter().copied().find(|&id| tree[id].column == Some(0)).unwrap();
        assert!(tree[winning].user_won);
        assert!(!tree[winning].bot_won);
        let mut stack = tree.children(winning).to_vec();
        while let Some(id) = stack.pop() {
            assert!(tree[id].user_won);
            stack.extend(tree.children(id).iter().copied());
        }
    }

    #[test]
    fn test_loss_certain_moves_are_pruned_at_root() {
        // x threatens (4,5); (4,1) cannot be played until column 1 has a piece
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            "..xxx..",
            "..oxoo.",
        ], Symbol::O);
        let tree = GameTree::new(&board, Symbol::O);
        assert_eq!(columns(&tree, tree.root()), vec![5]);
        assert_eq!(check_structure(&tree), tree.len());
    }

    #[test]
    fn test_win_found_keeps_the_winning_move() {
        // after x plays column 1, o dropping into column 3 makes an open three
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            ".oo..xx",
        ], Symbol::X);
        let tree = GameTree::new(&board, Symbol::O);
        let after_x = tree.child_for(tree.root(), 1).unwrap();
        assert_eq!(columns(&tree, after_x), vec![3]);
        let winning = tree.children(after_x)[0];
        assert!(!tree[winning].bot_won);
        assert!(tree.is_win_certain(winning));

        // both immediate wins stay available below the forced win
        let reply = tree.child_for(winning, 6).unwrap();
        let answers: Vec<usize> = tree
            .children(reply)
            .iter()
            .filter(|&&answer| tree[answer].bot_won)
            .filter_map(|&answer| tree[answer].column)
            .collect();
        assert_eq!(answers, vec![0, 4]);
    }

    #[test]
    fn test_pruning_only_removes_bot_moves() {
        let board = Board::new(4, 4, 4, Symbol::O).unwrap();
        let tree = GameTree::new(&board, Symbol::X);
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            let node = &tree[id];
            if node.mover() == Symbol::X && node.depth < HORIZON && !node.board.is_full() {
                // the user's replies are never discarded
                assert_eq!(node.children().len(), node.board.legal_columns().count());
            }
            stack.extend(node.children().iter().copied());
        }
    }

    #[test]
    fn test_advance_renumbers_and_regrows() {
        let board = Board::new(5, 5, 4, Symbol::X).unwrap();
        let mut tree = GameTree::new(&board, Symbol::X);
        for column in [2, 2, 1, 3] {
            let expected = tree[tree.root()].board.make_move(column).unwrap();
            tree.advance(column).unwrap();
            assert_eq!(tree[tree.root()].board, expected);
            assert_eq!(tree[tree.root()].parent(), None);
            assert_eq!(max_depth(&tree), HORIZON - 1);
            tree.extend_horizon();
            assert_eq!(max_depth(&tree), HORIZON);
            assert_eq!(check_structure(&tree), tree.len());
        }
    }

    #[test]
    fn test_extend_horizon_twice_adds_nothing() {
        let board = Board::new(4, 4, 4, Symbol::X).unwrap();
        let mut tree = GameTree::new(&board, Symbol::O);
        tree.advance(0).unwrap();
        tree.extend_horizon();
        let size = tree.len();
        tree.extend_horizon();
        assert_eq!(tree.len(), size);
    }

    #[test]
    fn test_advance_into_pruned_column_rebuilds() {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            "..xxx..",
            "..oxoo.",
        ], Symbol::O);
        let mut tree = GameTree::new(&board, Symbol::O);
        assert!(tree.child_for(tree.root(), 0).is_none());
        tree.advance(0).unwrap();
        tree.extend_horizon();
        let root = &tree[tree.root()];
        assert_eq!(root.board.get(5, 0), Some(Symbol::O));
        assert_eq!(root.board.turn(), Symbol::X);
        assert!(!tree.children(tree.root()).is_empty());
        assert!(tree.child_for(tree.root(), 5).map_or(false, |id| tree[id].user_won));
        assert_eq!(check_structure(&tree), tree.len());
    }

    #[test]
    fn test_extension_finds_forced_win_two_plies_up() {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            "......x",
        ], Symbol::O);
        let mut tree = GameTree::new(&board, Symbol::O);
        tree.advance(3).unwrap();

        // x stacks on column 6, o joins column 2, x plays column 5
        let path = [6, 2, 5];
        assert_eq!(columns(&tree, descend(&tree, &path)), vec![0, 1, 2, 3, 4, 5, 6]);
        tree.extend_horizon();
        // o in column 1 opens a three with both ends playable
        let node = descend(&tree, &path);
        assert_eq!(columns(&tree, node), vec![1]);
        assert!(tree.is_win_certain(tree.children(node)[0]));
        assert_eq!(check_structure(&tree), tree.len());
    }

    // x has just played column 3 next to its corner piece; o is the bot and moves next
    fn tree_before_x_threats() -> GameTree {
        let board = board(&[
            ".......",
            ".......",
            ".......",
            ".......",
            ".......",
            "o.....x",
        ], Symbol::X);
        let mut tree = GameTree::new(&board, Symbol::O);
        tree.advance(3).unwrap();
        tree
    }

    #[test]
    fn test_extension_drops_moves_that_allow_a_win() {
        let mut tree = tree_before_x_threats();
        // o, x in column 2, o in column 5, then x completes 2-3-4 aiming at (5,1)
        let path = [6, 2, 5, 4];
        assert_eq!(columns(&tree, descend(&tree, &path)), vec![0, 1, 2, 3, 4, 5, 6]);
        tree.extend_horizon();
        assert_eq!(columns(&tree, descend(&tree, &path)), vec![1]);
        assert_eq!(check_structure(&tree), tree.len());
    }

    #[test]
    fn test_extension_walks_impasses_upwards() {
        let mut tree = tree_before_x_threats();
        // after x joins column 2, every o move except 1, 4 and 5 lets x
        // build 2-3-4 with both (5,1) and (5,5) open
        let path = [6, 2];
        assert!(columns(&tree, descend(&tree, &path)).contains(&6));
        let doomed = descend(&tree, &[6, 2, 6, 4]);
        assert!(!tree.children(doomed).is_empty());

        tree.extend_horizon();
        assert_eq!(columns(&tree, descend(&tree, &path)), vec![1, 4, 5]);
        assert_eq!(check_structure(&tree), tree.len());
    }

    #[test]
    fn test_advance_rejects_illegal_columns() {
        let board = board(&[
            "x...",
            "o...",
            "x...",
            "o...",
        ], Symbol::X);
        let mut tree = GameTree::new(&board, Symbol::X);
        assert_eq!(tree.advance(0), Err(GameError::ColumnFull(0)));
        assert_eq!(tree.advance(7), Err(GameError::InvalidColumn(7)));
    }

    #[test]
    fn test_released_slots_are_reused() {
        let board = Board::new(4, 4, 4, Symbol::X).unwrap();
        let mut tree = GameTree::new(&board, Symbol::X);
        let capacity = tree.slots.len();
        for column in [0, 1, 2, 3, 0, 1] {
            tree.advance(column).unwrap();
            tree.extend_horizon();
            assert_eq!(check_structure(&tree), tree.len());
        }
        assert!(tree.slots.len() <= capacity * 2);
    }
}
