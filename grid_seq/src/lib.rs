//! # grid_seq
//!
//! 网格步进音序器的调度核心：音高 × 时间步 的网格上放置音符，
//! 按预设（音色/包络/音量）生成触发调度，并与音频时钟驱动的传输同步播放。
//!
//! ## 功能特性
//!
//! - **音符存储**：每个单元至多一个音符，时值 `1n`..`16n`
//! - **预设**：深度合并更新，列表永不为空
//! - **撤销/重做**：快照式历史，批量编辑只记录一次
//! - **选择**：单击/并集选择，批量调整时值
//! - **调度**：脏标记合并重建，重建时旧调度先释放，已触发的音符不会重复
//! - **自动扩展**：时间轴按增量增长
//!
//! ## 基本使用
//!
//! ```no_run
//! use grid_seq::{AudioClock, RodioSoundEngine, Sequencer, SequencerOptions, SoundEngine};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(RodioSoundEngine::new().expect("audio output"));
//! let mut sequencer = Sequencer::new(SequencerOptions::default());
//! sequencer.set_sound_engine(Some(engine.clone() as Arc<dyn SoundEngine>));
//!
//! sequencer.click_cell(60, 0, false);
//! sequencer.play(engine.now());
//! loop {
//!     sequencer.tick(engine.now());
//!     for event in sequencer.take_events() {
//!         // 在宿主的绘制边界应用光标等更新
//!         let _ = event;
//!     }
//! #   break;
//! }
//! ```

pub mod audio;
pub mod editor;
pub mod error;
pub mod grow;
pub mod history;
pub mod notes;
pub mod presets;
pub mod schedule;
pub mod selection;
pub mod sequencer;
pub mod session;
pub mod structure;
pub mod transport;

pub use audio::{AudioClock, NullSoundEngine, RodioSoundEngine, SoundEngine, SynthConfig, Trigger};
pub use editor::{EditorCommand, EditorEvent, KeyCommand, SequencerOptions};
pub use error::{EngineError, SessionError};
pub use sequencer::Sequencer;
pub use session::SessionRecord;
pub use structure::{
    Envelope, EnvelopePatch, Note, NoteDuration, NoteId, Preset, PresetId, PresetPatch,
};
pub use transport::PlaybackState;
