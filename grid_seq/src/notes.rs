//! 音符存储
//!
//! 稀疏网格内容：每个 `(midi, step)` 单元至多一个音符。

use crate::structure::{Cell, Note, NoteDuration, NoteId, PresetId, MIDI_MAX, MIDI_MIN};
use std::collections::{BTreeMap, HashSet};

/// Immutable copy of the note set, used by the history stacks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteSnapshot(BTreeMap<Cell, Note>);

impl NoteSnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct NoteStore {
    notes: BTreeMap<Cell, Note>,
    next_id: u64,
}

impl Default for NoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteStore {
    pub fn new() -> Self {
        Self {
            notes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuilds a store from persisted notes. Later duplicates of an occupied
    /// cell, out-of-range pitches and ids the counter cannot step past are
    /// dropped.
    pub fn from_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        let mut store = Self::new();
        for note in notes {
            if !(MIDI_MIN..=MIDI_MAX).contains(&note.midi) {
                log::warn!("Dropping note {:?} with pitch {} out of range", note.id, note.midi);
                continue;
            }
            if store.notes.contains_key(&note.cell()) {
                log::warn!("Dropping note {:?}: cell already occupied", note.id);
                continue;
            }
            let Some(after) = note.id.0.checked_add(1) else {
                log::warn!("Dropping note {:?}: id out of range", note.id);
                continue;
            };
            store.next_id = store.next_id.max(after);
            store.notes.insert(note.cell(), note);
        }
        store
    }

    /// `None` once the counter is exhausted.
    fn allocate_id(&mut self) -> Option<NoteId> {
        let id = NoteId(self.next_id);
        self.next_id = self.next_id.checked_add(1)?;
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes ordered by step, then pitch.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn to_vec(&self) -> Vec<Note> {
        self.notes.values().copied().collect()
    }

    pub fn is_occupied(&self, midi: u8, step: u32) -> bool {
        self.notes.contains_key(&Cell::new(midi, step))
    }

    pub fn at(&self, midi: u8, step: u32) -> Option<&Note> {
        self.notes.get(&Cell::new(midi, step))
    }

    pub fn get(&self, id: NoteId) -> Option<&Note> {
        self.notes.values().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.get(id).is_some()
    }

    /// The note sounding at a cell. Overlapping notes of the same pitch
    /// resolve to the most recently created one.
    pub fn covering(&self, midi: u8, step: u32) -> Option<&Note> {
        self.notes
            .range(..=Cell::new(midi, step))
            .map(|(_, note)| note)
            .filter(|note| note.covers(midi, step))
            .max_by_key(|note| note.id)
    }

    /// Column after the last sounding note, `None` when empty.
    pub fn furthest_end(&self) -> Option<u32> {
        self.notes.values().map(Note::end_step).max()
    }

    pub fn place(
        &mut self,
        midi: u8,
        step: u32,
        preset_id: PresetId,
        duration: NoteDuration,
    ) -> Option<NoteId> {
        if !(MIDI_MIN..=MIDI_MAX).contains(&midi) {
            return None;
        }
        let cell = Cell::new(midi, step);
        if self.notes.contains_key(&cell) {
            return None;
        }
        let id = self.allocate_id()?;
        self.notes.insert(
            cell,
            Note {
                id,
                midi,
                step,
                preset_id,
                duration,
            },
        );
        Some(id)
    }

    pub fn remove(&mut self, midi: u8, step: u32) -> Option<Note> {
        self.notes.remove(&Cell::new(midi, step))
    }

    pub fn remove_many(&mut self, ids: impl IntoIterator<Item = NoteId>) -> Vec<Note> {
        let targets: HashSet<NoteId> = ids.into_iter().collect();
        if targets.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::new();
        self.notes.retain(|_, note| {
            if targets.contains(&note.id) {
                removed.push(*note);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear_all(&mut self) {
        self.notes.clear();
    }

    /// Returns how many notes actually changed.
    pub fn set_duration(&mut self, ids: &[NoteId], duration: NoteDuration) -> usize {
        self.update_durations(ids, |_| duration)
    }

    /// Applies `f` to the duration of every note in `ids`.
    pub fn update_durations<F>(&mut self, ids: &[NoteId], f: F) -> usize
    where
        F: Fn(NoteDuration) -> NoteDuration,
    {
        let mut changed = 0;
        for note in self.notes.values_mut() {
            if ids.contains(&note.id) {
                let next = f(note.duration);
                if next != note.duration {
                    note.duration = next;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Whether `f` would change any of the given notes.
    pub fn would_change<F>(&self, ids: &[NoteId], f: F) -> bool
    where
        F: Fn(NoteDuration) -> NoteDuration,
    {
        self.notes
            .values()
            .any(|note| ids.contains(&note.id) && f(note.duration) != note.duration)
    }

    pub fn references(&self, preset_id: PresetId) -> bool {
        self.notes.values().any(|n| n.preset_id == preset_id)
    }

    pub fn reassign_preset(&mut self, from: PresetId, to: PresetId) -> usize {
        let mut changed = 0;
        for note in self.notes.values_mut() {
            if note.preset_id == from {
                note.preset_id = to;
                changed += 1;
            }
        }
        changed
    }

    pub fn snapshot(&self) -> NoteSnapshot {
        NoteSnapshot(self.notes.clone())
    }

    /// Replaces the note set. The id counter keeps counting so ids never repeat.
    pub fn restore(&mut self, snapshot: NoteSnapshot) {
        self.notes = snapshot.0;
        if let Some(max) = self.notes.values().map(|n| n.id.0).max() {
            self.next_id = self.next_id.max(max + 1);
        }
    }
}
