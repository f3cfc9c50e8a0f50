use crate::structure::{Note, NoteDuration, NoteId, PresetId, PresetPatch};
use crate::transport::PlaybackState;
use serde::{Deserialize, Serialize};

/// 键盘快捷操作
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCommand {
    Undo,
    Redo,
    /// Delete / Backspace.
    Delete,
    Lengthen,
    Shorten,
}

/// 外部宿主可监听的编辑事件
#[derive(Clone, Debug, PartialEq)]
pub enum EditorEvent {
    NotesChanged,
    PresetsChanged,
    SelectionChanged(Vec<NoteId>),
    /// Deferred cursor update; `None` hides the cursor.
    CursorMoved(Option<u32>),
    PlaybackStateChanged(PlaybackState),
    RangeGrown(u32),
    ScheduleRebuilt {
        entries: usize,
    },
}

/// 宿主可推送到编辑器的命令
#[derive(Clone, Debug)]
pub enum EditorCommand {
    ReplaceNotes(Vec<Note>),
    ClearNotes,
    PlaceNote {
        midi: u8,
        step: u32,
    },
    RemoveNote {
        midi: u8,
        step: u32,
    },
    SetSelectedDuration(NoteDuration),
    AddPreset,
    UpdatePreset {
        id: PresetId,
        patch: PresetPatch,
    },
    RemovePreset(PresetId),
    SetActivePreset(PresetId),
    SetMasterVolume(f32),
    SetBpm(f64),
    /// Audio-clock time of the request.
    Play(f64),
    Pause(f64),
    Resume(f64),
    Stop,
    Key(KeyCommand),
}

/// 初始化配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerOptions {
    pub bpm: f64,
    pub master_volume: f32,
    pub default_steps: u32,
    pub grow_increment: u32,
    pub lookahead_seconds: f64,
    /// `None` keeps every undo step.
    pub history_limit: Option<usize>,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            master_volume: 0.8,
            default_steps: 64,
            grow_increment: 16,
            lookahead_seconds: 0.1,
            history_limit: None,
        }
    }
}

impl SequencerOptions {
    /// Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_bpm(bpm: f64) -> Self {
        Self {
            bpm,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_missing_fields() {
        let options = SequencerOptions::from_json(r#"{ "bpm": 90.0, "history_limit": 32 }"#)
            .expect("valid options");
        assert_eq!(options.bpm, 90.0);
        assert_eq!(options.history_limit, Some(32));
        assert_eq!(options.default_steps, 64);
        assert_eq!(options.master_volume, 0.8);
    }

    #[test]
    fn options_reject_garbage() {
        assert!(SequencerOptions::from_json("not json").is_err());
    }
}
