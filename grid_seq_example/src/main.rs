use grid_seq::audio::AudioClock;
use grid_seq::{
    EditorEvent, KeyCommand, NullSoundEngine, PlaybackState, RodioSoundEngine, Sequencer,
    SequencerOptions, SessionRecord, SoundEngine,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Stand-in clock when no audio device is available.
struct WallClock(Instant);

impl AudioClock for WallClock {
    fn now(&self) -> f64 {
        self.0.elapsed().as_secs_f64()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let session_path = std::env::args().nth(1).map(PathBuf::from);
    let options = std::env::var("GRID_SEQ_OPTIONS")
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|text| {
            SequencerOptions::from_json(&text).unwrap_or_else(|err| {
                log::warn!("Ignoring invalid options: {err}");
                SequencerOptions::default()
            })
        })
        .unwrap_or_default();

    let mut sequencer = match session_path.as_deref().filter(|p| p.exists()) {
        Some(path) => Sequencer::from_record(&load_session(path), options),
        None => Sequencer::new(options),
    };
    if sequencer.notes().is_empty() {
        seed_arpeggio(&mut sequencer);
    }

    let (engine, clock): (Arc<dyn SoundEngine>, Arc<dyn AudioClock>) =
        match RodioSoundEngine::new() {
            Ok(engine) => {
                let engine = Arc::new(engine);
                let sound: Arc<dyn SoundEngine> = engine.clone();
                let clock: Arc<dyn AudioClock> = engine;
                (sound, clock)
            }
            Err(err) => {
                log::error!("{err}; continuing without sound");
                let sound: Arc<dyn SoundEngine> = Arc::new(NullSoundEngine);
                let clock: Arc<dyn AudioClock> = Arc::new(WallClock(Instant::now()));
                (sound, clock)
            }
        };
    sequencer.set_sound_engine(Some(engine));

    sequencer.play(clock.now());
    loop {
        sequencer.tick(clock.now());
        for event in sequencer.take_events() {
            match event {
                EditorEvent::CursorMoved(step) => log::debug!("cursor {:?}", step),
                other => log::info!("[EditorEvent] {:?}", other),
            }
        }
        if sequencer.playback_state() == PlaybackState::Stopped {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    // let the release tails ring out
    thread::sleep(Duration::from_millis(300));

    if let Some(path) = session_path {
        if let Err(err) = sequencer.to_record().save_to_path(&path) {
            log::error!("Failed to save session: {err}");
        }
    }
}

fn load_session(path: &Path) -> SessionRecord {
    match SessionRecord::load_from_path(path) {
        Ok(record) => record,
        Err(err) => {
            log::warn!("Could not load {}: {err}", path.display());
            SessionRecord::default()
        }
    }
}

/// C major arpeggio with a held top note.
fn seed_arpeggio(sequencer: &mut Sequencer) {
    for (midi, step) in [(60, 0), (64, 4), (67, 8)] {
        sequencer.click_cell(midi, step, false);
    }
    sequencer.click_cell(72, 12, false);
    sequencer.handle_key(KeyCommand::Lengthen);
    sequencer.handle_key(KeyCommand::Lengthen);
}
