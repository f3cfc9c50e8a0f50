//! 预设存储
//!
//! 预设列表永不为空，且始终有一个激活的预设。

use crate::structure::{Preset, PresetId, PresetPatch, PALETTE};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq)]
pub struct PresetStore {
    presets: Vec<Preset>,
    active: PresetId,
    next_id: u64,
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetStore {
    /// A store holding one default preset.
    pub fn new() -> Self {
        let first =
            Preset::with_defaults(PresetId(1), "Preset 1".to_owned(), PALETTE[0].to_owned());
        Self {
            active: first.id,
            presets: vec![first],
            next_id: 2,
        }
    }

    /// Restores persisted presets. Duplicate or unusable ids are dropped and
    /// negative volumes clamped. Returns `None` when nothing is left; a
    /// missing active id falls back to the first preset.
    pub fn from_presets(presets: Vec<Preset>, active: Option<PresetId>) -> Option<Self> {
        let mut seen = HashSet::new();
        let presets: Vec<Preset> = presets
            .into_iter()
            .filter_map(|mut preset| {
                if preset.id.0.checked_add(1).is_none() {
                    log::warn!("Dropping preset {:?}: id out of range", preset.id);
                    return None;
                }
                if !seen.insert(preset.id) {
                    log::warn!("Dropping preset {:?}: duplicate id", preset.id);
                    return None;
                }
                preset.volume = preset.volume.max(0.0);
                Some(preset)
            })
            .collect();
        let first = presets.first()?.id;
        let active = active
            .filter(|id| presets.iter().any(|p| p.id == *id))
            .unwrap_or(first);
        let next_id = presets.iter().map(|p| p.id.0 + 1).max().unwrap_or(1);
        Some(Self {
            presets,
            active,
            next_id,
        })
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn to_vec(&self) -> Vec<Preset> {
        self.presets.clone()
    }

    pub fn get(&self, id: PresetId) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn first(&self) -> &Preset {
        &self.presets[0]
    }

    /// Looks up `id`, falling back to the first preset for dangling references.
    pub fn resolve(&self, id: PresetId) -> &Preset {
        self.get(id).unwrap_or_else(|| {
            log::debug!("Preset {:?} not found, using first preset", id);
            self.first()
        })
    }

    pub fn active_id(&self) -> PresetId {
        self.active
    }

    pub fn active(&self) -> &Preset {
        self.resolve(self.active)
    }

    pub fn set_active(&mut self, id: PresetId) -> bool {
        if self.get(id).is_some() {
            self.active = id;
            true
        } else {
            false
        }
    }

    /// Appends a preset with default settings and the next palette colour,
    /// and makes it active. Once ids are exhausted nothing is added and the
    /// active id is returned.
    pub fn add(&mut self) -> PresetId {
        let id = PresetId(self.next_id);
        let Some(next_id) = self.next_id.checked_add(1) else {
            log::warn!("Preset ids exhausted");
            return self.active;
        };
        self.next_id = next_id;
        let color = PALETTE[self.presets.len() % PALETTE.len()];
        let name = format!("Preset {}", self.presets.len() + 1);
        self.presets.push(Preset::with_defaults(id, name, color.to_owned()));
        self.active = id;
        id
    }

    /// Deep-merges `patch` into the preset. Returns whether anything changed.
    pub fn update(&mut self, id: PresetId, patch: &PresetPatch) -> bool {
        match self.presets.iter_mut().find(|p| p.id == id) {
            Some(preset) => {
                let before = preset.clone();
                patch.apply_to(preset);
                *preset != before
            }
            None => false,
        }
    }

    /// Removes a preset unless it is the last one.
    pub fn remove(&mut self, id: PresetId) -> Option<Preset> {
        if self.presets.len() <= 1 {
            return None;
        }
        let index = self.presets.iter().position(|p| p.id == id)?;
        let removed = self.presets.remove(index);
        if self.active == id {
            self.active = self.presets[0].id;
        }
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::NoteDuration;

    #[test]
    fn add_cycles_palette_and_activates() {
        let mut store = PresetStore::new();
        let id = store.add();
        assert_eq!(store.active_id(), id);
        assert_eq!(store.get(id).map(|p| p.color.as_str()), Some(PALETTE[1]));
        for _ in 0..PALETTE.len() - 1 {
            store.add();
        }
        let wrapped = store.iter().last().map(|p| p.color.clone());
        assert_eq!(wrapped.as_deref(), Some(PALETTE[0]));
    }

    #[test]
    fn update_merges_fields() {
        let mut store = PresetStore::new();
        let id = store.active_id();
        let patch = PresetPatch {
            instrument: Some("square".into()),
            ..PresetPatch::default()
        };
        assert!(store.update(id, &patch));
        let preset = store.get(id).unwrap();
        assert_eq!(preset.instrument, "square");
        assert_eq!(preset.duration, NoteDuration::Quarter);
        assert!(!store.update(id, &patch));
        assert!(!store.update(PresetId(99), &patch));
    }

    #[test]
    fn removing_active_falls_back_to_first() {
        let mut store = PresetStore::new();
        let first = store.active_id();
        let second = store.add();
        assert!(store.remove(second).is_some());
        assert_eq!(store.active_id(), first);
        assert!(store.remove(first).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn dangling_reference_resolves_to_first() {
        let mut store = PresetStore::new();
        let first = store.active_id();
        store.add();
        assert_eq!(store.resolve(PresetId(42)).id, first);
    }

    #[test]
    fn restore_rejects_empty_list() {
        assert!(PresetStore::from_presets(Vec::new(), None).is_none());
        let store = PresetStore::new();
        let restored = PresetStore::from_presets(store.to_vec(), Some(PresetId(9))).unwrap();
        assert_eq!(restored.active_id(), store.first().id);
    }

    #[test]
    fn restore_sanitizes_presets() {
        let mut loud = Preset::with_defaults(PresetId(3), "A".into(), PALETTE[0].into());
        loud.volume = -2.0;
        let twin = Preset::with_defaults(PresetId(3), "B".into(), PALETTE[1].into());
        let overflow = Preset::with_defaults(PresetId(u64::MAX), "C".into(), PALETTE[2].into());
        let mut store = PresetStore::from_presets(vec![loud, twin, overflow], None).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.first().name, "A");
        assert_eq!(store.first().volume, 0.0);
        assert_eq!(store.add(), PresetId(4));
        assert!(PresetStore::from_presets(
            vec![Preset::with_defaults(PresetId(u64::MAX), "C".into(), PALETTE[2].into())],
            None
        )
        .is_none());
    }
}
