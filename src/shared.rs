// Types shared between the engine and the terminal front-end.
//
// Keys (see tui/input.rs):
//   Space         PlayPause
//   1 / 2 / 3     ToggleMode(Original / Recording / Combined)
//   m             SelectMode(next)
//   o             PlayModeOnly(selected)
//   p             Pause
//   Left / Right  Skip(-5 / +5)
//   Home          SeekTo(0)
//   r             ToggleArm
//   s             StopRecording
//   [ / ]         TrackVolume(-/+)
//   - / =         MetronomeVolume(-/+)
//   l             ToggleLive
//   , / .         TargetBpm(-/+)
//   Esc / q       Quit
use std::sync::Arc;

use crate::capture::{SavedTake, Take};
use crate::live::LiveStats;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlayMode {
    #[default]
    Original,
    Recording,
    Combined,
}

impl PlayMode {
    pub const ALL: [PlayMode; 3] = [PlayMode::Original, PlayMode::Recording, PlayMode::Combined];

    pub fn label(self) -> &'static str {
        match self {
            PlayMode::Original => "ORIGINAL",
            PlayMode::Recording => "RECORDING",
            PlayMode::Combined => "COMBINED",
        }
    }

    pub fn next(self) -> Self {
        match self {
            PlayMode::Original => PlayMode::Recording,
            PlayMode::Recording => PlayMode::Combined,
            PlayMode::Combined => PlayMode::Original,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    PlayPause,
    PlayModeOnly(PlayMode),
    ToggleMode(PlayMode),
    SelectMode(PlayMode),
    Pause,
    Skip(f64),
    SeekTo(f64),
    ToggleArm,
    StopRecording,
    TrackVolume(f32), // delta
    MetronomeVolume(f32),
    ToggleLive,
    TargetBpm(f32), // delta
    Quit,
}

/// A finished take and where it went on disk, if anywhere.
#[derive(Clone, Debug)]
pub struct TakeInfo {
    pub take: Arc<Take>,
    pub saved: Option<SavedTake>,
    pub offset_secs: f64, // where in the original the take begins
}

// Everything the front-end draws. Rebuilt by the engine after every command
// and housekeeping tick.
#[derive(Clone, Debug, Default)]
pub struct EngineState {
    pub file_name: Option<String>,
    pub bpm: Option<f32>,
    pub position_sec: f64,
    pub duration_sec: f64,
    pub selected_mode: PlayMode,
    pub playing_mode: Option<PlayMode>,
    pub playing: bool,
    pub track_count: usize,
    pub armed: bool,
    pub recording: bool,
    pub last_take: Option<TakeInfo>,
    pub processing: bool, // tempo detection running
    pub error: Option<String>,
    pub track_volume: f32,
    pub metronome_volume: f32,
    pub metronome_running: bool,
    pub live_running: bool,
    pub live_target_bpm: f32,
    pub live: LiveStats,
}
