//! 传输时钟适配
//!
//! `Transport` 是 停止/运行/暂停 状态机，位置由音频时钟推进；
//! `TransportClock` 在其上挂载调度 (`Part`) 与十六分音符周期任务 (`Loop`)，
//! 每次 `tick` 发出到期的触发并把光标更新排入延迟显示队列。

use crate::audio::Trigger;
use crate::schedule::{Part, ScheduleEntry};
use crate::structure::NoteId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const STEPS_PER_BEAT: f64 = 4.0;
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 400.0;
pub const DEFAULT_BPM: f64 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

/// Musical position driven by an external audio clock (`now`, in seconds).
#[derive(Clone, Debug)]
pub struct Transport {
    state: PlaybackState,
    bpm: f64,
    seconds: f64,
    steps: f64,
    last_clock: f64,
}

impl Transport {
    pub fn new(bpm: f64) -> Self {
        Self {
            state: PlaybackState::Stopped,
            bpm: if bpm.is_finite() {
                bpm.clamp(MIN_BPM, MAX_BPM)
            } else {
                DEFAULT_BPM
            },
            seconds: 0.0,
            steps: 0.0,
            last_clock: 0.0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlaybackState::Running
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Applies from the next advance on; elapsed steps are not recomputed.
    /// Non-finite values are ignored.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        if bpm.is_finite() {
            self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        } else {
            log::warn!("Ignoring non-finite tempo {}", bpm);
        }
        self.bpm
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn steps(&self) -> f64 {
        self.steps
    }

    /// The discrete grid column under the play position.
    pub fn current_step(&self) -> u32 {
        self.steps.max(0.0).floor() as u32
    }

    pub fn seconds_per_step(&self) -> f64 {
        60.0 / self.bpm / STEPS_PER_BEAT
    }

    pub fn start(&mut self, now: f64) {
        self.seconds = 0.0;
        self.steps = 0.0;
        self.last_clock = now;
        self.state = PlaybackState::Running;
    }

    pub fn pause(&mut self, now: f64) {
        if self.state == PlaybackState::Running {
            self.advance(now);
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self, now: f64) {
        if self.state == PlaybackState::Paused {
            self.last_clock = now;
            self.state = PlaybackState::Running;
        }
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.seconds = 0.0;
        self.steps = 0.0;
    }

    pub fn advance(&mut self, now: f64) {
        if self.state != PlaybackState::Running {
            return;
        }
        let delta = (now - self.last_clock).max(0.0);
        self.seconds += delta;
        self.steps += delta / self.seconds_per_step();
        self.last_clock = self.last_clock.max(now);
    }

    /// Audio-clock time at which `step` is reached at the current tempo.
    pub fn audio_time_of(&self, step: f64) -> f64 {
        self.last_clock + (step - self.steps) * self.seconds_per_step()
    }

    pub fn transport_time_of(&self, step: f64) -> f64 {
        self.seconds + (step - self.steps) * self.seconds_per_step()
    }
}

/// The single periodic task, firing once per sixteenth-note boundary.
#[derive(Clone, Debug, Default)]
struct Loop {
    next_step: u32,
}

impl Loop {
    fn reset(&mut self) {
        self.next_step = 0;
    }

    fn due(&mut self, step: u32) -> bool {
        if step >= self.next_step {
            self.next_step = step + 1;
            true
        } else {
            false
        }
    }
}

/// 需要在安全的显示边界应用的更新
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockEvent {
    Cursor(Option<u32>),
    /// Playback reached the end of the sequence.
    Ended,
}

/// What one tick produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tick {
    pub triggers: Vec<Trigger>,
    pub ended: bool,
}

pub struct TransportClock {
    transport: Transport,
    part: Option<Part>,
    repeat: Option<Loop>,
    /// Play position at the previous tick. Entries before it are never fired late.
    floor: f64,
    /// Entries handed to the engine during this run, with their step.
    fired: HashMap<NoteId, u32>,
    lookahead: f64,
    max_step: Option<u32>,
    cursor: Option<u32>,
    display: Vec<ClockEvent>,
}

impl TransportClock {
    pub fn new(bpm: f64, lookahead_seconds: f64) -> Self {
        Self {
            transport: Transport::new(bpm),
            part: None,
            repeat: Some(Loop::default()),
            floor: 0.0,
            fired: HashMap::new(),
            lookahead: lookahead_seconds.max(0.0),
            max_step: None,
            cursor: None,
            display: Vec::new(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.transport.set_bpm(bpm)
    }

    pub fn cursor(&self) -> Option<u32> {
        self.cursor
    }

    pub fn max_step(&self) -> Option<u32> {
        self.max_step
    }

    pub fn set_max_step(&mut self, max_step: Option<u32>) {
        self.max_step = max_step;
    }

    pub fn part(&self) -> Option<&Part> {
        self.part.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.repeat.is_none()
    }

    /// Replaces the installed schedule. The previous part is disposed first.
    /// Fired entries are remembered by note id, so a rebuilt schedule neither
    /// repeats them nor skips new entries ahead of the play position.
    pub fn install(&mut self, part: Part) {
        if let Some(mut old) = self.part.take() {
            old.dispose();
        }
        if self.is_disposed() {
            return;
        }
        self.part = Some(part);
    }

    pub fn start(&mut self, now: f64) {
        if self.is_disposed() {
            return;
        }
        self.transport.start(now);
        self.floor = 0.0;
        self.fired.clear();
        if let Some(repeat) = &mut self.repeat {
            repeat.reset();
        }
        log::info!("Transport started at {} BPM", self.transport.bpm());
    }

    /// Suspends playback. Triggers fired ahead of the play position are
    /// forgotten and fire again on resume, so the caller must cancel them at
    /// the engine.
    pub fn pause(&mut self, now: f64) {
        self.transport.pause(now);
        let position = self.transport.steps();
        self.floor = position;
        self.fired.retain(|_, step| (*step as f64) < position);
        log::info!("Transport paused at step {}", self.transport.current_step());
    }

    pub fn resume(&mut self, now: f64) {
        self.transport.resume(now);
    }

    pub fn stop(&mut self) {
        self.transport.stop();
        self.floor = 0.0;
        self.fired.clear();
        self.set_cursor(None);
        log::info!("Transport stopped");
    }

    fn set_cursor(&mut self, cursor: Option<u32>) {
        if self.cursor != cursor {
            self.cursor = cursor;
            self.display.push(ClockEvent::Cursor(cursor));
        }
    }

    fn trigger_for(&self, entry: &ScheduleEntry) -> Trigger {
        let step = entry.step as f64;
        Trigger {
            note_id: entry.note_id,
            note_name: entry.note_name.clone(),
            midi: entry.midi,
            time: self.transport.audio_time_of(step),
            transport_time: self.transport.transport_time_of(step).max(0.0),
            duration: entry.duration.span() as f64 * self.transport.seconds_per_step(),
            duration_token: entry.duration,
            gain: entry.gain,
            instrument: entry.instrument.clone(),
            envelope: entry.envelope,
        }
    }

    /// Advances to `now`, returns the triggers that became due within the
    /// lookahead window and queues cursor updates for display.
    pub fn tick(&mut self, now: f64) -> Tick {
        if self.is_disposed() || !self.transport.is_running() {
            return Tick::default();
        }
        self.transport.advance(now);

        let position = self.transport.steps();
        let horizon = position + self.lookahead / self.transport.seconds_per_step();
        let due: Vec<(u32, Trigger)> = match &self.part {
            Some(part) => part
                .window(self.floor, horizon)
                .filter(|entry| !self.fired.contains_key(&entry.note_id))
                .map(|entry| (entry.step, self.trigger_for(entry)))
                .collect(),
            None => Vec::new(),
        };
        let mut triggers = Vec::with_capacity(due.len());
        for (step, trigger) in due {
            self.fired.insert(trigger.note_id, step);
            triggers.push(trigger);
        }
        self.floor = self.floor.max(position);

        let step = self.transport.current_step();
        if let Some(max) = self.max_step {
            if step >= max {
                self.stop();
                self.display.push(ClockEvent::Ended);
                return Tick {
                    triggers,
                    ended: true,
                };
            }
        }

        let due = self.repeat.as_mut().map(|r| r.due(step)).unwrap_or(false);
        if due {
            self.set_cursor(Some(step));
        }
        Tick {
            triggers,
            ended: false,
        }
    }

    /// Display updates queued since the last call.
    pub fn take_display_events(&mut self) -> Vec<ClockEvent> {
        std::mem::take(&mut self.display)
    }

    /// Tears down the loop and the installed part. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(mut part) = self.part.take() {
            part.dispose();
        }
        if self.repeat.take().is_some() {
            self.transport.stop();
            self.cursor = None;
            log::debug!("Transport clock disposed");
        }
    }
}

impl Drop for TransportClock {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteStore;
    use crate::presets::PresetStore;
    use crate::schedule::build_schedule;
    use crate::structure::NoteDuration;

    fn part_with(notes: &[(u8, u32, NoteDuration)]) -> (Part, Option<u32>) {
        let presets = PresetStore::new();
        let mut store = NoteStore::new();
        for (midi, step, duration) in notes {
            store.place(*midi, *step, presets.active_id(), *duration);
        }
        (Part::new(build_schedule(&store, &presets, 1.0)), store.furthest_end())
    }

    #[test]
    fn step_follows_seconds_and_tempo() {
        let mut transport = Transport::new(120.0);
        transport.start(10.0);
        transport.advance(11.0);
        // 1 s at 120 BPM = 2 beats = 8 sixteenths
        assert_eq!(transport.current_step(), 8);
        transport.set_bpm(60.0);
        assert_eq!(transport.current_step(), 8);
        transport.advance(12.0);
        assert_eq!(transport.current_step(), 12);
        assert!((transport.seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn pause_keeps_position_stop_resets() {
        let mut transport = Transport::new(120.0);
        transport.start(0.0);
        transport.pause(0.5);
        transport.advance(5.0);
        assert_eq!(transport.current_step(), 4);
        transport.resume(5.0);
        transport.advance(5.25);
        assert_eq!(transport.current_step(), 6);
        transport.stop();
        assert_eq!(transport.state(), PlaybackState::Stopped);
        assert_eq!(transport.current_step(), 0);
    }

    #[test]
    fn fires_each_entry_once_and_ends() {
        let (part, max) = part_with(&[
            (60, 0, NoteDuration::Quarter),
            (62, 2, NoteDuration::Eighth),
        ]);
        let mut clock = TransportClock::new(120.0, 0.1);
        clock.install(part);
        clock.set_max_step(max);
        clock.start(0.0);

        let mut fired = Vec::new();
        let mut now = 0.0;
        let mut ended = false;
        while now < 1.0 && !ended {
            let tick = clock.tick(now);
            fired.extend(tick.triggers.into_iter().map(|t| t.note_name));
            ended = tick.ended;
            now += 0.01;
        }
        assert_eq!(fired, vec!["C4".to_owned(), "D4".to_owned()]);
        assert!(ended);
        assert_eq!(clock.state(), PlaybackState::Stopped);
        assert_eq!(clock.cursor(), None);
    }

    #[test]
    fn reinstall_does_not_refire() {
        let (part, _) =
            part_with(&[(60, 0, NoteDuration::Quarter), (62, 8, NoteDuration::Quarter)]);
        let mut clock = TransportClock::new(120.0, 0.0);
        clock.install(part);
        clock.start(0.0);
        assert_eq!(clock.tick(0.0).triggers.len(), 0);
        assert_eq!(clock.tick(0.2).triggers.len(), 1);

        let (replacement, _) =
            part_with(&[(60, 0, NoteDuration::Quarter), (62, 8, NoteDuration::Quarter)]);
        clock.install(replacement);
        assert_eq!(clock.tick(0.5).triggers.len(), 0);
        let late = clock.tick(1.1).triggers;
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].note_name, "D4");
    }

    #[test]
    fn reinstall_fires_new_entry_inside_lookahead() {
        let (part, _) =
            part_with(&[(60, 0, NoteDuration::Quarter), (60, 16, NoteDuration::Quarter)]);
        let mut clock = TransportClock::new(120.0, 0.1);
        clock.install(part);
        clock.start(0.0);
        assert_eq!(clock.tick(0.0).triggers.len(), 1);
        // position 2.4, lookahead reaches 3.2
        assert!(clock.tick(0.3).triggers.is_empty());

        let (replacement, _) = part_with(&[
            (60, 0, NoteDuration::Quarter),
            (60, 16, NoteDuration::Quarter),
            (64, 3, NoteDuration::Quarter),
        ]);
        clock.install(replacement);
        let names: Vec<String> =
            clock.tick(0.31).triggers.into_iter().map(|t| t.note_name).collect();
        assert_eq!(names, vec!["E4".to_owned()]);
        assert!(clock.tick(0.32).triggers.is_empty());
    }

    #[test]
    fn passed_entries_are_not_fired_late() {
        let (part, _) = part_with(&[(60, 0, NoteDuration::Quarter)]);
        let mut clock = TransportClock::new(120.0, 0.0);
        clock.install(part);
        clock.start(0.0);
        clock.tick(0.5);
        let (replacement, _) =
            part_with(&[(60, 0, NoteDuration::Quarter), (62, 1, NoteDuration::Quarter)]);
        clock.install(replacement);
        assert!(clock.tick(0.6).triggers.is_empty());
    }

    #[test]
    fn non_finite_tempo_is_ignored() {
        let mut transport = Transport::new(f64::NAN);
        assert_eq!(transport.bpm(), DEFAULT_BPM);
        transport.set_bpm(60.0);
        assert_eq!(transport.set_bpm(f64::NAN), 60.0);
        assert_eq!(transport.set_bpm(f64::INFINITY), 60.0);
        transport.start(0.0);
        transport.advance(1.0);
        assert_eq!(transport.current_step(), 4);
    }

    #[test]
    fn cursor_updates_are_deferred() {
        let mut clock = TransportClock::new(120.0, 0.1);
        clock.start(0.0);
        clock.tick(0.0);
        clock.tick(0.13);
        assert_eq!(
            clock.take_display_events(),
            vec![ClockEvent::Cursor(Some(0)), ClockEvent::Cursor(Some(1))]
        );
        assert!(clock.take_display_events().is_empty());
    }

    #[test]
    fn dispose_is_idempotent() {
        let (part, _) = part_with(&[(60, 0, NoteDuration::Quarter)]);
        let mut clock = TransportClock::new(120.0, 0.1);
        clock.install(part);
        clock.start(0.0);
        clock.dispose();
        clock.dispose();
        assert!(clock.is_disposed());
        assert!(clock.part().is_none());
        assert_eq!(clock.tick(1.0), Tick::default());
    }
}
