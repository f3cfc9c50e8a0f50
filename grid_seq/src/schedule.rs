//! 调度构建
//!
//! 由音符与预设整体重建触发列表；从不做增量修补，避免预设修改后残留旧引用。

use crate::notes::NoteStore;
use crate::presets::PresetStore;
use crate::structure::{Envelope, NoteDuration, NoteId};
use std::collections::BTreeSet;

/// One derived trigger instruction, positioned in steps.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleEntry {
    pub note_id: NoteId,
    pub step: u32,
    pub note_name: String,
    pub midi: u8,
    pub duration: NoteDuration,
    pub gain: f32,
    pub instrument: String,
    pub envelope: Envelope,
}

/// Resolves every note against its preset. Dangling preset references use the
/// first preset. Ordered by step, pitch, then creation.
pub fn build_schedule(
    notes: &NoteStore,
    presets: &PresetStore,
    master_volume: f32,
) -> Vec<ScheduleEntry> {
    let mut entries: Vec<ScheduleEntry> = notes
        .iter()
        .map(|note| {
            let preset = presets.resolve(note.preset_id);
            ScheduleEntry {
                note_id: note.id,
                step: note.step,
                note_name: note.name(),
                midi: note.midi,
                duration: note.duration,
                gain: preset.volume * master_volume,
                instrument: preset.instrument.clone(),
                envelope: preset.envelope,
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        a.step
            .cmp(&b.step)
            .then_with(|| a.midi.cmp(&b.midi))
            .then_with(|| a.note_id.cmp(&b.note_id))
    });
    entries
}

/// Distinct instruments a schedule needs loaded.
pub fn instruments(entries: &[ScheduleEntry]) -> BTreeSet<&str> {
    entries.iter().map(|e| e.instrument.as_str()).collect()
}

/// 已安装到传输时钟上的调度。
///
/// `dispose` 幂等；释放后不再产生任何触发。
#[derive(Debug, Default)]
pub struct Part {
    entries: Vec<ScheduleEntry>,
    disposed: bool,
}

impl Part {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self {
            entries,
            disposed: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entries whose step lies in `[from, to)`, in order. Nothing once disposed.
    pub fn window(&self, from: f64, to: f64) -> impl Iterator<Item = &ScheduleEntry> {
        let live = !self.disposed;
        self.entries.iter().filter(move |entry| {
            let step = entry.step as f64;
            live && step >= from && step < to
        })
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.entries = Vec::new();
    }
}

impl Drop for Part {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{PresetId, PresetPatch};

    #[test]
    fn entries_resolve_preset_fields() {
        let mut presets = PresetStore::new();
        let first = presets.active_id();
        presets.update(
            first,
            &PresetPatch {
                volume: Some(0.5),
                instrument: Some("square".into()),
                ..PresetPatch::default()
            },
        );
        let mut notes = NoteStore::new();
        notes.place(60, 4, first, NoteDuration::Eighth);
        notes.place(64, 0, first, NoteDuration::Quarter);

        let entries = build_schedule(&notes, &presets, 0.8);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].step, 0);
        assert_eq!(entries[0].note_name, "E4");
        assert_eq!(entries[1].note_name, "C4");
        assert_eq!(entries[1].duration, NoteDuration::Eighth);
        assert!((entries[1].gain - 0.4).abs() < 1e-6);
        assert_eq!(entries[1].instrument, "square");
    }

    #[test]
    fn dangling_preset_falls_back_to_first() {
        let presets = PresetStore::new();
        let mut notes = NoteStore::new();
        notes.place(60, 0, PresetId(77), NoteDuration::Quarter);
        let entries = build_schedule(&notes, &presets, 1.0);
        assert_eq!(entries[0].instrument, presets.first().instrument);
    }

    #[test]
    fn disposed_part_yields_nothing() {
        let presets = PresetStore::new();
        let mut notes = NoteStore::new();
        notes.place(60, 0, presets.active_id(), NoteDuration::Quarter);
        let mut part = Part::new(build_schedule(&notes, &presets, 1.0));
        assert_eq!(part.window(0.0, 1.0).count(), 1);
        part.dispose();
        part.dispose();
        assert!(part.is_disposed());
        assert_eq!(part.window(0.0, 1.0).count(), 0);
    }
}
