use crate::error::EngineError;
use crate::structure::{Envelope, NoteDuration, NoteId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 一次发声请求，时间以音频时钟秒为单位
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    pub note_id: NoteId,
    pub note_name: String,
    pub midi: u8,
    /// Audio-clock time the note should start at.
    pub time: f64,
    /// Transport position of the note start.
    pub transport_time: f64,
    /// Sounding length in seconds at the tempo it was fired with.
    pub duration: f64,
    pub duration_token: NoteDuration,
    pub gain: f32,
    pub instrument: String,
    pub envelope: Envelope,
}

/// 宿主提供的发声引擎。
///
/// 乐器加载需幂等且带缓存；对尚未加载的乐器调用 `play` 时应静默跳过。
pub trait SoundEngine {
    fn load_instrument(&self, name: &str) -> Result<(), EngineError>;
    fn is_loaded(&self, name: &str) -> bool;
    fn play(&self, trigger: &Trigger) -> Result<(), EngineError>;
    /// Cancels sounding and pending notes.
    fn all_notes_off(&self);
}

/// A monotonic clock advanced by rendered audio, not by the wall clock.
pub trait AudioClock {
    fn now(&self) -> f64;
}

/// 空实现，允许宿主禁用音频输出。
#[derive(Default)]
pub struct NullSoundEngine;

impl SoundEngine for NullSoundEngine {
    fn load_instrument(&self, _name: &str) -> Result<(), EngineError> {
        Ok(())
    }
    fn is_loaded(&self, _name: &str) -> bool {
        true
    }
    fn play(&self, _trigger: &Trigger) -> Result<(), EngineError> {
        Ok(())
    }
    fn all_notes_off(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Waveform {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "triangle" => Some(Waveform::Triangle),
            "sawtooth" | "saw" => Some(Waveform::Sawtooth),
            _ => None,
        }
    }

    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SynthConfig {
    pub sample_rate: u32,
    pub max_voices: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            max_voices: 32,
        }
    }
}

/// 默认的振荡器播放实现：rodio 输出，按采样点精确起音。
pub struct RodioSoundEngine {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sender: Sender<AudioMessage>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    loaded: RefCell<HashSet<String>>,
}

impl RodioSoundEngine {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(SynthConfig::default())
    }

    pub fn with_config(config: SynthConfig) -> Result<Self, EngineError> {
        let (_stream, handle) =
            OutputStream::try_default().map_err(|e| EngineError::Output(e.to_string()))?;
        let (sender, receiver) = unbounded();
        let frames = Arc::new(AtomicU64::new(0));
        let synth = PolyphonicSynth::new(receiver, config, Arc::clone(&frames));
        handle
            .play_raw(synth.convert_samples())
            .map_err(|e| EngineError::Output(e.to_string()))?;
        log::info!("Audio output started at {} Hz", config.sample_rate);

        Ok(Self {
            _stream,
            _handle: handle,
            sender,
            frames,
            sample_rate: config.sample_rate,
            loaded: RefCell::new(HashSet::new()),
        })
    }

    fn dispatch(&self, msg: AudioMessage) -> Result<(), EngineError> {
        self.sender.send(msg).map_err(|_| EngineError::Disconnected)
    }
}

impl SoundEngine for RodioSoundEngine {
    fn load_instrument(&self, name: &str) -> Result<(), EngineError> {
        if self.is_loaded(name) {
            return Ok(());
        }
        Waveform::from_name(name).ok_or_else(|| EngineError::UnknownInstrument(name.to_owned()))?;
        self.loaded.borrow_mut().insert(name.to_owned());
        log::debug!("Loaded instrument `{}`", name);
        Ok(())
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.loaded.borrow().contains(name)
    }

    fn play(&self, trigger: &Trigger) -> Result<(), EngineError> {
        let waveform = match Waveform::from_name(&trigger.instrument) {
            Some(waveform) if self.is_loaded(&trigger.instrument) => waveform,
            _ => {
                log::debug!(
                    "Skipping {} on `{}`: instrument not loaded",
                    trigger.note_name,
                    trigger.instrument
                );
                return Ok(());
            }
        };
        let sr = self.sample_rate as f64;
        let now = self.frames.load(Ordering::Relaxed);
        let start_frame = ((trigger.time * sr).round().max(0.0) as u64).max(now);
        let length_frames = (trigger.duration * sr).round().max(1.0) as u64;
        self.dispatch(AudioMessage::NoteOn(ScheduledVoice {
            start_frame,
            length_frames,
            frequency: midi_to_frequency(trigger.midi),
            gain: trigger.gain,
            waveform,
            envelope: trigger.envelope,
        }))
    }

    fn all_notes_off(&self) {
        let _ = self.dispatch(AudioMessage::AllNotesOff);
    }
}

impl AudioClock for RodioSoundEngine {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

pub fn midi_to_frequency(midi: u8) -> f32 {
    440.0 * 2.0f32.powf((midi as f32 - 69.0) / 12.0)
}

#[derive(Clone, Copy, Debug)]
struct ScheduledVoice {
    start_frame: u64,
    length_frames: u64,
    frequency: f32,
    gain: f32,
    waveform: Waveform,
    envelope: Envelope,
}

#[derive(Clone, Copy, Debug)]
enum AudioMessage {
    NoteOn(ScheduledVoice),
    AllNotesOff,
}

struct PolyphonicSynth {
    receiver: Receiver<AudioMessage>,
    pending: Vec<ScheduledVoice>,
    voices: Vec<Voice>,
    frames: Arc<AtomicU64>,
    frame: u64,
    config: SynthConfig,
}

impl PolyphonicSynth {
    fn new(receiver: Receiver<AudioMessage>, config: SynthConfig, frames: Arc<AtomicU64>) -> Self {
        Self {
            receiver,
            pending: Vec::new(),
            voices: Vec::new(),
            frames,
            frame: 0,
            config,
        }
    }

    fn process_messages(&mut self) {
        while let Ok(msg) = self.receiver.try_recv() {
            match msg {
                AudioMessage::NoteOn(voice) => self.pending.push(voice),
                AudioMessage::AllNotesOff => {
                    self.pending.clear();
                    self.voices.clear();
                }
            }
        }
    }

    fn start_due_voices(&mut self) {
        let frame = self.frame;
        let sample_rate = self.config.sample_rate;
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].start_frame <= frame {
                let scheduled = self.pending.swap_remove(index);
                if self.voices.len() >= self.config.max_voices {
                    self.voices.remove(0);
                }
                self.voices.push(Voice::new(scheduled, sample_rate));
            } else {
                index += 1;
            }
        }
    }
}

impl Iterator for PolyphonicSynth {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        self.process_messages();
        self.start_due_voices();

        let mut mix = 0.0;
        self.voices.retain_mut(|voice| {
            mix += voice.next_sample();
            !voice.is_finished()
        });

        self.frame += 1;
        self.frames.store(self.frame, Ordering::Relaxed);
        Some((mix * 0.7).tanh())
    }
}

impl Source for PolyphonicSynth {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// One sounding note. The envelope is evaluated from elapsed time, so
/// zero-length stages are skipped.
struct Voice {
    phase: f32,
    frequency: f32,
    gain: f32,
    waveform: Waveform,
    envelope: Envelope,
    sample_rate: f32,
    /// Frames since the voice started.
    age: u64,
    /// Frames left before the release begins.
    remaining: u64,
    /// Level and age at release.
    released: Option<(f32, u64)>,
    finished: bool,
}

impl Voice {
    fn new(scheduled: ScheduledVoice, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            frequency: scheduled.frequency,
            gain: scheduled.gain,
            waveform: scheduled.waveform,
            envelope: scheduled.envelope,
            sample_rate: sample_rate as f32,
            age: 0,
            remaining: scheduled.length_frames,
            released: None,
            finished: false,
        }
    }

    fn next_sample(&mut self) -> f32 {
        let level = self.level();
        let sample = self.waveform.sample(self.phase) * self.gain * level;
        self.phase += self.frequency / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.age += 1;
        sample
    }

    /// Attack-decay-sustain level while the note is held.
    fn held_level(&self) -> f32 {
        let Envelope {
            attack,
            decay,
            sustain,
            ..
        } = self.envelope;
        let sustain = sustain.clamp(0.0, 1.0);
        let t = self.age as f32 / self.sample_rate;
        if t < attack {
            t / attack
        } else if t < attack + decay {
            1.0 - (1.0 - sustain) * (t - attack) / decay
        } else {
            sustain
        }
    }

    fn level(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            return self.held_level();
        }
        let (from, at) = match self.released {
            Some(release) => release,
            None => {
                let release = (self.held_level(), self.age);
                self.released = Some(release);
                release
            }
        };
        let release = self.envelope.release.max(0.0);
        let t = (self.age - at) as f32 / self.sample_rate;
        if t >= release {
            self.finished = true;
            0.0
        } else {
            from * (1.0 - t / release)
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
