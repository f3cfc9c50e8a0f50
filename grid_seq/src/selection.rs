//! 选择管理
//!
//! 维护当前选中的音符集合与指针悬停的单元格。

use crate::structure::{Cell, NoteId};
use std::collections::BTreeSet;

/// What a primary click on a grid cell should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickAction {
    /// The cell holds a selected note.
    Deselect(NoteId),
    /// The cell holds an unselected note.
    Select { id: NoteId, union: bool },
    /// The cell is empty: create a note, then select it.
    Create { union: bool },
}

#[derive(Clone, Debug, Default)]
pub struct Selection {
    selected: BTreeSet<NoteId>,
    hovered: Option<Cell>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_click(&self, occupant: Option<NoteId>, union: bool) -> ClickAction {
        match occupant {
            Some(id) if self.selected.contains(&id) => ClickAction::Deselect(id),
            Some(id) => ClickAction::Select { id, union },
            None => ClickAction::Create { union },
        }
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn ids(&self) -> Vec<NoteId> {
        self.selected.iter().copied().collect()
    }

    pub fn set_single(&mut self, id: NoteId) {
        self.selected.clear();
        self.selected.insert(id);
    }

    pub fn extend(&mut self, id: NoteId) {
        self.selected.insert(id);
    }

    /// Plain selects replace, union selects add.
    pub fn select(&mut self, id: NoteId, union: bool) {
        if union {
            self.extend(id);
        } else {
            self.set_single(id);
        }
    }

    pub fn remove(&mut self, id: NoteId) -> bool {
        self.selected.remove(&id)
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Drops ids whose notes no longer exist. Returns whether anything was pruned.
    pub fn prune<F>(&mut self, exists: F) -> bool
    where
        F: Fn(NoteId) -> bool,
    {
        let before = self.selected.len();
        self.selected.retain(|id| exists(*id));
        before != self.selected.len()
    }

    pub fn hover_enter(&mut self, cell: Cell) {
        self.hovered = Some(cell);
    }

    pub fn hover_leave(&mut self) {
        self.hovered = None;
    }

    pub fn hovered(&self) -> Option<Cell> {
        self.hovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_resolution() {
        let mut selection = Selection::new();
        selection.set_single(NoteId(1));
        assert_eq!(
            selection.resolve_click(Some(NoteId(1)), false),
            ClickAction::Deselect(NoteId(1))
        );
        assert_eq!(
            selection.resolve_click(Some(NoteId(2)), true),
            ClickAction::Select { id: NoteId(2), union: true }
        );
        assert_eq!(selection.resolve_click(None, false), ClickAction::Create { union: false });
    }

    #[test]
    fn plain_select_replaces_union_adds() {
        let mut selection = Selection::new();
        selection.select(NoteId(1), false);
        selection.select(NoteId(2), true);
        assert_eq!(selection.ids(), vec![NoteId(1), NoteId(2)]);
        selection.select(NoteId(3), false);
        assert_eq!(selection.ids(), vec![NoteId(3)]);
    }

    #[test]
    fn prune_removes_missing() {
        let mut selection = Selection::new();
        selection.extend(NoteId(1));
        selection.extend(NoteId(2));
        assert!(selection.prune(|id| id == NoteId(2)));
        assert_eq!(selection.ids(), vec![NoteId(2)]);
        assert!(!selection.prune(|_| true));
    }
}
