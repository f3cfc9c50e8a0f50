//! 音序器门面
//!
//! 持有全部存储（音符、预设、历史、选择、自动扩展、传输时钟），
//! 对外暴露网格输入与播放控制。所有修改同步完成，调度重建延迟到下一次 `tick`/`flush`。

use crate::audio::SoundEngine;
use crate::editor::{EditorCommand, EditorEvent, KeyCommand, SequencerOptions};
use crate::grow::AutoGrow;
use crate::history::History;
use crate::notes::{NoteSnapshot, NoteStore};
use crate::presets::PresetStore;
use crate::schedule::{build_schedule, instruments, Part};
use crate::selection::{ClickAction, Selection};
use crate::session::{SessionRecord, SESSION_VERSION};
use crate::structure::{Cell, Note, NoteDuration, NoteId, Preset, PresetId, PresetPatch};
use crate::transport::{ClockEvent, PlaybackState, TransportClock};
use std::sync::Arc;

pub struct Sequencer {
    notes: NoteStore,
    presets: PresetStore,
    history: History<NoteSnapshot>,
    selection: Selection,
    grow: AutoGrow,
    clock: TransportClock,
    master_volume: f32,
    engine: Option<Arc<dyn SoundEngine>>,
    schedule_dirty: bool,
    pending_events: Vec<EditorEvent>,
    event_listener: Option<Box<dyn FnMut(&EditorEvent)>>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequencerOptions::default())
    }
}

impl Sequencer {
    pub fn new(options: SequencerOptions) -> Self {
        Self::with_stores(NoteStore::new(), PresetStore::new(), options)
    }

    fn with_stores(notes: NoteStore, presets: PresetStore, options: SequencerOptions) -> Self {
        let mut grow = AutoGrow::new(options.default_steps, options.grow_increment);
        if let Some(end) = notes.furthest_end() {
            grow.ensure(end);
        }
        Self {
            notes,
            presets,
            history: History::new(options.history_limit),
            selection: Selection::new(),
            grow,
            clock: TransportClock::new(options.bpm, options.lookahead_seconds),
            master_volume: options.master_volume.clamp(0.0, 1.0),
            engine: None,
            schedule_dirty: true,
            pending_events: Vec::new(),
            event_listener: None,
        }
    }

    /// Restores a persisted session. Tempo and volume come from the record.
    pub fn from_record(record: &SessionRecord, options: SequencerOptions) -> Self {
        let (notes, presets) = record.to_stores();
        let options = SequencerOptions {
            bpm: record.bpm,
            master_volume: record.master_volume,
            ..options
        };
        Self::with_stores(notes, presets, options)
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            version: SESSION_VERSION.to_owned(),
            notes: self.notes.to_vec(),
            presets: self.presets.to_vec(),
            active_preset: Some(self.presets.active_id()),
            master_volume: self.master_volume,
            bpm: self.clock.transport().bpm(),
        }
    }

    pub fn set_sound_engine(&mut self, engine: Option<Arc<dyn SoundEngine>>) {
        if let Some(old) = &self.engine {
            old.all_notes_off();
        }
        self.engine = engine;
        // the new engine still needs its instruments loaded
        self.schedule_dirty = true;
    }

    pub fn set_event_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&EditorEvent) + 'static,
    {
        self.event_listener = Some(Box::new(listener));
    }

    pub fn take_events(&mut self) -> Vec<EditorEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn emit_event(&mut self, event: EditorEvent) {
        if let Some(listener) = &mut self.event_listener {
            listener(&event);
        }
        self.pending_events.push(event);
    }

    fn push_undo_snapshot(&mut self) {
        self.history.record(self.notes.snapshot());
    }

    fn notes_changed(&mut self) {
        self.schedule_dirty = true;
        self.emit_event(EditorEvent::NotesChanged);
    }

    fn presets_changed(&mut self) {
        self.schedule_dirty = true;
        self.emit_event(EditorEvent::PresetsChanged);
    }

    fn emit_selection(&mut self) {
        let ids = self.selection.ids();
        self.emit_event(EditorEvent::SelectionChanged(ids));
    }

    fn grow_to(&mut self, end_step: u32) {
        if let Some(range) = self.grow.ensure(end_step) {
            log::debug!("Timeline grew to {} steps", range);
            self.emit_event(EditorEvent::RangeGrown(range));
        }
    }

    // ---- queries ----

    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn note_at(&self, midi: u8, step: u32) -> Option<&Note> {
        self.notes.at(midi, step)
    }

    /// The note drawn at a cell, including the tail of a longer note.
    pub fn note_under(&self, midi: u8, step: u32) -> Option<&Note> {
        self.notes.covering(midi, step)
    }

    /// Selected ids, with ids of deleted notes pruned first.
    pub fn selected(&mut self) -> Vec<NoteId> {
        self.prune_selection();
        self.selection.ids()
    }

    pub fn is_selected(&self, id: NoteId) -> bool {
        self.selection.contains(id) && self.notes.contains(id)
    }

    pub fn hovered(&self) -> Option<Cell> {
        self.selection.hovered()
    }

    pub fn range(&self) -> u32 {
        self.grow.range()
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn bpm(&self) -> f64 {
        self.clock.transport().bpm()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.clock.state()
    }

    pub fn cursor(&self) -> Option<u32> {
        self.clock.cursor()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// The currently installed schedule, if any.
    pub fn part(&self) -> Option<&Part> {
        self.clock.part()
    }

    fn prune_selection(&mut self) {
        let notes = &self.notes;
        if self.selection.prune(|id| notes.contains(id)) {
            log::debug!("Pruned stale selection entries");
        }
    }

    // ---- note editing ----

    /// Places a note with the active preset and its default duration.
    pub fn place_note(&mut self, midi: u8, step: u32) -> Option<NoteId> {
        let preset = self.presets.active();
        let (preset_id, duration) = (preset.id, preset.duration);
        if self.notes.is_occupied(midi, step) {
            return None;
        }
        let before = self.notes.snapshot();
        let id = self.notes.place(midi, step, preset_id, duration)?;
        self.history.record(before);
        self.notes_changed();
        self.grow_to(step.saturating_add(duration.span()));
        Some(id)
    }

    pub fn remove_note(&mut self, midi: u8, step: u32) -> Option<Note> {
        self.notes.at(midi, step)?;
        self.push_undo_snapshot();
        let removed = self.notes.remove(midi, step)?;
        if self.selection.remove(removed.id) {
            self.emit_selection();
        }
        self.notes_changed();
        Some(removed)
    }

    pub fn clear_notes(&mut self) {
        if self.notes.is_empty() {
            return;
        }
        self.push_undo_snapshot();
        self.notes.clear_all();
        self.notes_changed();
        if !self.selection.is_empty() {
            self.selection.clear();
            self.emit_selection();
        }
    }

    /// Replaces every note in one undoable step.
    pub fn replace_notes(&mut self, notes: Vec<Note>) {
        let incoming = NoteStore::from_notes(notes);
        self.push_undo_snapshot();
        self.notes.restore(incoming.snapshot());
        self.prune_selection();
        self.notes_changed();
        if let Some(end) = self.notes.furthest_end() {
            self.grow_to(end);
        }
    }

    /// Removes the selected notes, or the note under the hovered cell when
    /// nothing is selected. Returns how many notes were removed.
    pub fn delete_selected_or_hovered(&mut self) -> usize {
        self.prune_selection();
        if self.selection.is_empty() {
            return match self.selection.hovered() {
                Some(cell) => self.remove_note(cell.midi, cell.step).map_or(0, |_| 1),
                None => 0,
            };
        }
        let ids = self.selection.ids();
        self.push_undo_snapshot();
        let removed = self.notes.remove_many(ids);
        self.selection.clear();
        self.notes_changed();
        self.emit_selection();
        removed.len()
    }

    fn step_selected_durations<F>(&mut self, f: F) -> usize
    where
        F: Fn(NoteDuration) -> NoteDuration,
    {
        self.prune_selection();
        let ids = self.selection.ids();
        if !self.notes.would_change(&ids, &f) {
            return 0;
        }
        self.push_undo_snapshot();
        let changed = self.notes.update_durations(&ids, &f);
        self.notes_changed();
        let end = ids
            .iter()
            .filter_map(|id| self.notes.get(*id))
            .map(Note::end_step)
            .max();
        if let Some(end) = end {
            self.grow_to(end);
        }
        changed
    }

    pub fn lengthen_selected(&mut self) -> usize {
        self.step_selected_durations(NoteDuration::longer)
    }

    pub fn shorten_selected(&mut self) -> usize {
        self.step_selected_durations(NoteDuration::shorter)
    }

    pub fn set_selected_duration(&mut self, duration: NoteDuration) -> usize {
        self.step_selected_durations(|_| duration)
    }

    pub fn undo(&mut self) -> bool {
        if !self.history.can_undo() {
            return false;
        }
        match self.history.undo(self.notes.snapshot()) {
            Some(previous) => {
                self.restore_snapshot(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.can_redo() {
            return false;
        }
        match self.history.redo(self.notes.snapshot()) {
            Some(next) => {
                self.restore_snapshot(next);
                true
            }
            None => false,
        }
    }

    fn restore_snapshot(&mut self, snapshot: NoteSnapshot) {
        self.notes.restore(snapshot);
        let notes = &self.notes;
        let pruned = self.selection.prune(|id| notes.contains(id));
        self.notes_changed();
        if pruned {
            self.emit_selection();
        }
        if let Some(end) = self.notes.furthest_end() {
            self.grow_to(end);
        }
    }

    // ---- grid input ----

    /// Primary click on a grid cell.
    pub fn click_cell(&mut self, midi: u8, step: u32, union: bool) {
        let occupant = self.notes.at(midi, step).map(|n| n.id);
        match self.selection.resolve_click(occupant, union) {
            ClickAction::Deselect(id) => {
                self.selection.remove(id);
                self.emit_selection();
            }
            ClickAction::Select { id, union } => {
                self.prune_selection();
                self.selection.select(id, union);
                self.emit_selection();
            }
            ClickAction::Create { union } => {
                if let Some(id) = self.place_note(midi, step) {
                    self.prune_selection();
                    self.selection.select(id, union);
                    self.emit_selection();
                }
            }
        }
    }

    /// Secondary click deletes the note at the cell.
    pub fn secondary_click(&mut self, midi: u8, step: u32) -> Option<Note> {
        self.remove_note(midi, step)
    }

    pub fn hover_enter(&mut self, midi: u8, step: u32) {
        self.selection.hover_enter(Cell::new(midi, step));
    }

    pub fn hover_leave(&mut self) {
        self.selection.hover_leave();
    }

    pub fn handle_key(&mut self, key: KeyCommand) {
        match key {
            KeyCommand::Undo => {
                self.undo();
            }
            KeyCommand::Redo => {
                self.redo();
            }
            KeyCommand::Delete => {
                self.delete_selected_or_hovered();
            }
            KeyCommand::Lengthen => {
                self.lengthen_selected();
            }
            KeyCommand::Shorten => {
                self.shorten_selected();
            }
        }
    }

    pub fn viewport_scrolled(&mut self, last_visible_step: u32) {
        if let Some(range) = self.grow.viewport(last_visible_step) {
            self.emit_event(EditorEvent::RangeGrown(range));
        }
    }

    // ---- presets ----

    pub fn add_preset(&mut self) -> PresetId {
        let id = self.presets.add();
        self.presets_changed();
        id
    }

    pub fn update_preset(&mut self, id: PresetId, patch: &PresetPatch) -> bool {
        let changed = self.presets.update(id, patch);
        if changed {
            self.presets_changed();
        }
        changed
    }

    /// New notes use the active preset; the schedule is unaffected.
    pub fn set_active_preset(&mut self, id: PresetId) -> bool {
        let previous = self.presets.active_id();
        let found = self.presets.set_active(id);
        if found && previous != id {
            self.emit_event(EditorEvent::PresetsChanged);
        }
        found
    }

    /// Removes a preset (never the last one). Notes using it move to the
    /// first remaining preset in one undoable step.
    pub fn remove_preset(&mut self, id: PresetId) -> Option<Preset> {
        if self.presets.len() <= 1 || self.presets.get(id).is_none() {
            return None;
        }
        let uses = self.notes.references(id);
        if uses {
            self.push_undo_snapshot();
        }
        let removed = self.presets.remove(id)?;
        if uses {
            let fallback = self.presets.first().id;
            let moved = self.notes.reassign_preset(id, fallback);
            log::debug!("Moved {} notes from removed preset to {:?}", moved, fallback);
            self.emit_event(EditorEvent::NotesChanged);
        }
        self.presets_changed();
        Some(removed)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if (self.master_volume - volume).abs() > f32::EPSILON {
            self.master_volume = volume;
            self.schedule_dirty = true;
        }
    }

    /// Clamped to 20..=400. Takes effect from the next tick.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.clock.set_bpm(bpm)
    }

    // ---- playback ----

    /// Rebuilds the schedule if anything changed since the last build.
    pub fn flush(&mut self) {
        if !self.schedule_dirty {
            return;
        }
        self.schedule_dirty = false;
        let entries = build_schedule(&self.notes, &self.presets, self.master_volume);
        if let Some(engine) = &self.engine {
            for name in instruments(&entries) {
                if engine.is_loaded(name) {
                    continue;
                }
                if let Err(err) = engine.load_instrument(name) {
                    log::warn!("Failed to load instrument {}: {}", name, err);
                }
            }
        }
        let count = entries.len();
        self.clock.install(Part::new(entries));
        self.clock.set_max_step(self.notes.furthest_end());
        log::debug!("Schedule rebuilt with {} entries", count);
        self.emit_event(EditorEvent::ScheduleRebuilt { entries: count });
    }

    /// Starts from the top. A restart first cancels triggers already queued
    /// at the engine.
    pub fn play(&mut self, now: f64) {
        self.flush();
        if self.clock.state() != PlaybackState::Stopped {
            self.silence();
        }
        self.clock.start(now);
        self.emit_event(EditorEvent::PlaybackStateChanged(PlaybackState::Running));
    }

    pub fn pause(&mut self, now: f64) {
        if self.clock.state() != PlaybackState::Running {
            return;
        }
        self.clock.pause(now);
        self.silence();
        self.emit_event(EditorEvent::PlaybackStateChanged(PlaybackState::Paused));
    }

    pub fn resume(&mut self, now: f64) {
        if self.clock.state() != PlaybackState::Paused {
            return;
        }
        self.clock.resume(now);
        self.emit_event(EditorEvent::PlaybackStateChanged(PlaybackState::Running));
    }

    pub fn stop(&mut self) {
        let was = self.clock.state();
        self.clock.stop();
        self.silence();
        self.drain_clock_events();
        if was != PlaybackState::Stopped {
            self.emit_event(EditorEvent::PlaybackStateChanged(PlaybackState::Stopped));
        }
    }

    fn silence(&self) {
        if let Some(engine) = &self.engine {
            engine.all_notes_off();
        }
    }

    /// Drives playback from the engine's audio clock.
    pub fn tick(&mut self, now: f64) {
        self.flush();
        let tick = self.clock.tick(now);
        if let Some(engine) = &self.engine {
            for trigger in &tick.triggers {
                log::debug!(
                    "Trigger {} ({}) at {:.3}s",
                    trigger.note_name,
                    trigger.duration_token,
                    trigger.transport_time
                );
                if let Err(err) = engine.play(trigger) {
                    log::warn!("Sound engine rejected {}: {}", trigger.note_name, err);
                }
            }
        }
        self.drain_clock_events();
        if tick.ended {
            log::info!("Playback reached the end of the sequence");
        }
    }

    fn drain_clock_events(&mut self) {
        for event in self.clock.take_display_events() {
            match event {
                ClockEvent::Cursor(step) => self.emit_event(EditorEvent::CursorMoved(step)),
                ClockEvent::Ended => {
                    self.emit_event(EditorEvent::PlaybackStateChanged(PlaybackState::Stopped))
                }
            }
        }
    }

    pub fn apply_command(&mut self, command: EditorCommand) {
        match command {
            EditorCommand::ReplaceNotes(notes) => self.replace_notes(notes),
            EditorCommand::ClearNotes => self.clear_notes(),
            EditorCommand::PlaceNote { midi, step } => {
                self.place_note(midi, step);
            }
            EditorCommand::RemoveNote { midi, step } => {
                self.remove_note(midi, step);
            }
            EditorCommand::SetSelectedDuration(duration) => {
                self.set_selected_duration(duration);
            }
            EditorCommand::AddPreset => {
                self.add_preset();
            }
            EditorCommand::UpdatePreset { id, patch } => {
                self.update_preset(id, &patch);
            }
            EditorCommand::RemovePreset(id) => {
                self.remove_preset(id);
            }
            EditorCommand::SetActivePreset(id) => {
                self.set_active_preset(id);
            }
            EditorCommand::SetMasterVolume(volume) => self.set_master_volume(volume),
            EditorCommand::SetBpm(bpm) => {
                self.set_bpm(bpm);
            }
            EditorCommand::Play(now) => self.play(now),
            EditorCommand::Pause(now) => self.pause(now),
            EditorCommand::Resume(now) => self.resume(now),
            EditorCommand::Stop => self.stop(),
            EditorCommand::Key(key) => self.handle_key(key),
        }
    }

    /// Stops playback and releases the installed schedule.
    pub fn dispose(&mut self) {
        self.silence();
        self.clock.dispose();
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> Sequencer {
        Sequencer::new(SequencerOptions::default())
    }

    #[test]
    fn placing_copies_active_duration() {
        let mut seq = sequencer();
        let preset = seq.presets().active_id();
        seq.update_preset(
            preset,
            &PresetPatch {
                duration: Some(NoteDuration::Eighth),
                ..PresetPatch::default()
            },
        );
        let id = seq.place_note(60, 0).expect("placed");
        seq.update_preset(
            preset,
            &PresetPatch {
                duration: Some(NoteDuration::Whole),
                ..PresetPatch::default()
            },
        );
        assert_eq!(seq.notes().get(id).map(|n| n.duration), Some(NoteDuration::Eighth));
    }

    #[test]
    fn occupied_cell_records_nothing() {
        let mut seq = sequencer();
        seq.place_note(60, 0);
        assert_eq!(seq.place_note(60, 0), None);
        assert_eq!(seq.notes().len(), 1);
        seq.undo();
        assert!(seq.notes().is_empty());
        assert!(!seq.can_undo());
    }

    #[test]
    fn clamped_lengthen_is_not_recorded() {
        let mut seq = sequencer();
        let preset = seq.presets().active_id();
        seq.update_preset(
            preset,
            &PresetPatch {
                duration: Some(NoteDuration::Whole),
                ..PresetPatch::default()
            },
        );
        seq.click_cell(60, 0, false);
        assert_eq!(seq.lengthen_selected(), 0);
        seq.undo();
        assert!(seq.notes().is_empty());
    }

    #[test]
    fn placing_past_the_edge_grows_range() {
        let mut seq = sequencer();
        seq.take_events();
        seq.place_note(60, 62);
        assert_eq!(seq.range(), 96);
        assert!(seq.take_events().contains(&EditorEvent::RangeGrown(96)));
    }

    #[test]
    fn edits_between_ticks_rebuild_once() {
        let mut seq = sequencer();
        seq.flush();
        seq.take_events();
        seq.place_note(60, 0);
        seq.place_note(62, 4);
        seq.set_master_volume(0.5);
        seq.tick(0.0);
        let rebuilds: Vec<_> = seq
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, EditorEvent::ScheduleRebuilt { .. }))
            .collect();
        assert_eq!(rebuilds, vec![EditorEvent::ScheduleRebuilt { entries: 2 }]);
        let gain = seq.part().map(|p| p.entries()[0].gain);
        assert_eq!(gain, Some(0.5));
    }

    #[test]
    fn removing_preset_reassigns_notes_in_one_step() {
        let mut seq = sequencer();
        let first = seq.presets().active_id();
        let second = seq.add_preset();
        seq.place_note(60, 0);
        seq.place_note(62, 0);
        let removed = seq.remove_preset(second).expect("removed");
        assert_eq!(removed.id, second);
        assert_eq!(seq.presets().active_id(), first);
        assert!(seq.notes().iter().all(|n| n.preset_id == first));
        assert!(seq.remove_preset(first).is_none());
        seq.undo();
        assert!(seq.notes().iter().all(|n| n.preset_id == second));
    }

    #[test]
    fn record_round_trip_keeps_state() {
        let mut seq = sequencer();
        seq.place_note(60, 0);
        seq.add_preset();
        seq.set_bpm(90.0);
        let record = seq.to_record();
        let restored = Sequencer::from_record(&record, SequencerOptions::default());
        assert_eq!(restored.notes().len(), 1);
        assert_eq!(restored.presets().len(), 2);
        assert_eq!(restored.presets().active_id(), seq.presets().active_id());
        assert_eq!(restored.bpm(), 90.0);
    }

    #[test]
    fn commands_route_to_operations() {
        let mut seq = sequencer();
        seq.apply_command(EditorCommand::PlaceNote { midi: 64, step: 2 });
        seq.apply_command(EditorCommand::SetBpm(1000.0));
        assert_eq!(seq.bpm(), 400.0);
        seq.apply_command(EditorCommand::Key(KeyCommand::Undo));
        assert!(seq.notes().is_empty());
        seq.apply_command(EditorCommand::Key(KeyCommand::Redo));
        assert!(seq.note_at(64, 2).is_some());
    }
}
