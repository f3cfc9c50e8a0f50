//! 数据结构模块
//!
//! 定义音符、预设以及时值等核心数据结构。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest placeable pitch (A0).
pub const MIDI_MIN: u8 = 21;
/// Highest placeable pitch (C8).
pub const MIDI_MAX: u8 = 108;

/// 新建预设时按数量轮换使用的颜色
pub const PALETTE: [&str; 8] = [
    "#4f9dff", "#ff6b6b", "#51cf66", "#fcc419", "#cc5de8", "#ff922b", "#22b8cf", "#f06595",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PresetId(pub u64);

/// A grid position. Ordered by step first so iteration follows time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub step: u32,
    pub midi: u8,
}

impl Cell {
    pub fn new(midi: u8, step: u32) -> Self {
        Self { step, midi }
    }
}

/// 音符时值，一个 step 为十六分音符
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteDuration {
    #[serde(rename = "1n")]
    Whole,
    #[serde(rename = "2n")]
    Half,
    #[serde(rename = "4n")]
    Quarter,
    #[serde(rename = "8n")]
    Eighth,
    #[serde(rename = "16n")]
    Sixteenth,
}

impl NoteDuration {
    /// Longest first.
    pub const ALL: [NoteDuration; 5] = [
        NoteDuration::Whole,
        NoteDuration::Half,
        NoteDuration::Quarter,
        NoteDuration::Eighth,
        NoteDuration::Sixteenth,
    ];

    /// Number of grid columns the duration occupies.
    pub fn span(self) -> u32 {
        match self {
            NoteDuration::Whole => 16,
            NoteDuration::Half => 8,
            NoteDuration::Quarter => 4,
            NoteDuration::Eighth => 2,
            NoteDuration::Sixteenth => 1,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            NoteDuration::Whole => "1n",
            NoteDuration::Half => "2n",
            NoteDuration::Quarter => "4n",
            NoteDuration::Eighth => "8n",
            NoteDuration::Sixteenth => "16n",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|d| *d == self).unwrap_or(0)
    }

    /// One position towards `Whole`, clamped.
    pub fn longer(self) -> Self {
        Self::ALL[self.index().saturating_sub(1)]
    }

    /// One position towards `Sixteenth`, clamped.
    pub fn shorter(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }
}

impl Default for NoteDuration {
    fn default() -> Self {
        NoteDuration::Quarter
    }
}

impl fmt::Display for NoteDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub midi: u8,
    pub step: u32,
    pub preset_id: PresetId,
    pub duration: NoteDuration,
}

impl Note {
    pub fn cell(&self) -> Cell {
        Cell::new(self.midi, self.step)
    }

    /// First column after the note.
    pub fn end_step(&self) -> u32 {
        self.step.saturating_add(self.duration.span())
    }

    pub fn covers(&self, midi: u8, step: u32) -> bool {
        self.midi == midi && step >= self.step && step < self.end_step()
    }

    pub fn name(&self) -> String {
        midi_note_name(self.midi)
    }
}

/// ADSR 包络参数（秒 / 0..1 电平）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.008,
            decay: 0.06,
            sustain: 0.75,
            release: 0.15,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    pub color: String,
    pub duration: NoteDuration,
    pub instrument: String,
    pub volume: f32,
    #[serde(default)]
    pub envelope: Envelope,
}

impl Preset {
    pub fn with_defaults(id: PresetId, name: String, color: String) -> Self {
        Self {
            id,
            name,
            color,
            duration: NoteDuration::Quarter,
            instrument: "sine".to_owned(),
            volume: 1.0,
            envelope: Envelope::default(),
        }
    }
}

/// 预设的局部更新，`None` 字段保持原值
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub duration: Option<NoteDuration>,
    pub instrument: Option<String>,
    pub volume: Option<f32>,
    pub envelope: Option<EnvelopePatch>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopePatch {
    pub attack: Option<f32>,
    pub decay: Option<f32>,
    pub sustain: Option<f32>,
    pub release: Option<f32>,
}

impl PresetPatch {
    pub fn is_empty(&self) -> bool {
        *self == PresetPatch::default()
    }

    /// Merges the patch into `preset`, nested fields included.
    pub fn apply_to(&self, preset: &mut Preset) {
        if let Some(name) = &self.name {
            preset.name = name.clone();
        }
        if let Some(color) = &self.color {
            preset.color = color.clone();
        }
        if let Some(duration) = self.duration {
            preset.duration = duration;
        }
        if let Some(instrument) = &self.instrument {
            preset.instrument = instrument.clone();
        }
        if let Some(volume) = self.volume {
            preset.volume = volume.max(0.0);
        }
        if let Some(envelope) = &self.envelope {
            envelope.apply_to(&mut preset.envelope);
        }
    }
}

impl EnvelopePatch {
    pub fn apply_to(&self, envelope: &mut Envelope) {
        if let Some(attack) = self.attack {
            envelope.attack = attack.max(0.0);
        }
        if let Some(decay) = self.decay {
            envelope.decay = decay.max(0.0);
        }
        if let Some(sustain) = self.sustain {
            envelope.sustain = sustain.clamp(0.0, 1.0);
        }
        if let Some(release) = self.release {
            envelope.release = release.max(0.0);
        }
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
