//! 会话持久化
//!
//! 将音符、预设与播放参数保存为 JSON，加载失败时回退到默认会话。

use crate::error::SessionError;
use crate::notes::NoteStore;
use crate::presets::PresetStore;
use crate::structure::{Note, Preset, PresetId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const SESSION_VERSION: &str = "1.0";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: String,
    #[serde(default)]
    pub notes: Vec<Note>,
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub active_preset: Option<PresetId>,
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
}

fn default_master_volume() -> f32 {
    0.8
}

fn default_bpm() -> f64 {
    120.0
}

impl Default for SessionRecord {
    fn default() -> Self {
        let presets = PresetStore::new();
        Self {
            version: SESSION_VERSION.to_owned(),
            notes: Vec::new(),
            active_preset: Some(presets.active_id()),
            presets: presets.to_vec(),
            master_volume: default_master_volume(),
            bpm: default_bpm(),
        }
    }
}

impl SessionRecord {
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        let record: SessionRecord = serde_json::from_str(text)?;
        if record.presets.is_empty() {
            return Err(SessionError::NoPresets);
        }
        Ok(record)
    }

    /// Parses `text`, falling back to an empty session with one default
    /// preset when it is unreadable.
    pub fn restore_or_default(text: &str) -> Self {
        match Self::from_json(text) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Discarding stored session: {}", err);
                Self::default()
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_json()?)?;
        log::info!("Session saved to {}", path.display());
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SessionError> {
        let text = fs::read_to_string(path)?;
        let record = Self::from_json(&text)?;
        log::info!(
            "Session loaded from {} ({} notes, {} presets)",
            path.display(),
            record.notes.len(),
            record.presets.len()
        );
        Ok(record)
    }

    /// Builds the stores. Invalid notes are dropped by the note store.
    pub fn to_stores(&self) -> (NoteStore, PresetStore) {
        let notes = NoteStore::from_notes(self.notes.iter().copied());
        let presets = PresetStore::from_presets(self.presets.clone(), self.active_preset)
            .unwrap_or_default();
        (notes, presets)
    }
}
