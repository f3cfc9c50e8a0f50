//! 快照式撤销/重做

/// Two snapshot stacks, oldest first. Snapshots are taken *before* a
/// mutation, so the top of `undo_stack` is the state to return to.
#[derive(Clone, Debug)]
pub struct History<State> {
    undo_stack: Vec<State>,
    redo_stack: Vec<State>,
    limit: Option<usize>,
}

impl<State> Default for History<State> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<State> History<State> {
    /// `limit` caps the undo depth; `None` keeps everything.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Call once per user mutation with the pre-mutation state.
    pub fn record(&mut self, before: State) {
        self.undo_stack.push(before);
        if let Some(limit) = self.limit {
            if self.undo_stack.len() > limit {
                let excess = self.undo_stack.len() - limit;
                self.undo_stack.drain(..excess);
            }
        }
        self.redo_stack.clear();
    }

    /// Returns the state to restore, parking `current` on the redo stack.
    pub fn undo(&mut self, current: State) -> Option<State> {
        let previous = self.undo_stack.pop()?;
        self.redo_stack.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: State) -> Option<State> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push(current);
        Some(next)
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::History;

    #[test]
    fn should_undo_and_redo() {
        let mut history = History::new(None);
        let mut state = 5;

        history.record(state);
        state = 6;
        history.record(state);
        state = 9;

        assert!(history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.redo(state), None);

        state = history.undo(state).unwrap();
        assert_eq!(state, 6);
        state = history.undo(state).unwrap();
        assert_eq!(state, 5);
        assert_eq!(history.undo(state), None);

        state = history.redo(state).unwrap();
        assert_eq!(state, 6);
        state = history.redo(state).unwrap();
        assert_eq!(state, 9);
        assert!(!history.can_redo());
    }

    #[test]
    fn new_record_clears_redo() {
        let mut history = History::new(None);
        history.record(1);
        let restored = history.undo(2).unwrap();
        assert_eq!(restored, 1);
        assert!(history.can_redo());
        history.record(restored);
        assert!(!history.can_redo());
    }

    #[test]
    fn limit_drops_oldest() {
        let mut history = History::new(Some(2));
        history.record(1);
        history.record(2);
        history.record(3);
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.undo(4), Some(3));
        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), None);
    }
}
