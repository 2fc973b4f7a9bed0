use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};

use super::mode::TuiState;
use backtrack::shared::{InputEvent, PlayMode};

const SKIP_SECS: f64 = 5.0;
const VOLUME_STEP: f32 = 0.05;
const BPM_STEP: f32 = 1.0;

// poll for a key press and resolve it into input events for the engine
pub fn poll_input(timeout: Duration, ts: &TuiState) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }

    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code, ts));
    }
    Ok(vec![])
}

fn handle_key(code: KeyCode, ts: &TuiState) -> Vec<InputEvent> {
    match code {
        KeyCode::Esc | KeyCode::Char('q') => vec![InputEvent::Quit],
        KeyCode::Char(' ') => vec![InputEvent::PlayPause],

        // mode rows: play that mode from the top, or pause it if it's the one playing
        KeyCode::Char('1') => vec![InputEvent::ToggleMode(PlayMode::Original)],
        KeyCode::Char('2') => vec![InputEvent::ToggleMode(PlayMode::Recording)],
        KeyCode::Char('3') => vec![InputEvent::ToggleMode(PlayMode::Combined)],
        KeyCode::Char('m') => vec![InputEvent::SelectMode(ts.selected_mode.next())],
        KeyCode::Char('o') => vec![InputEvent::PlayModeOnly(ts.selected_mode)],
        KeyCode::Char('p') => vec![InputEvent::Pause],

        KeyCode::Left => vec![InputEvent::Skip(-SKIP_SECS)],
        KeyCode::Right => vec![InputEvent::Skip(SKIP_SECS)],
        KeyCode::Home => vec![InputEvent::SeekTo(0.0)],

        KeyCode::Char('r') => vec![InputEvent::ToggleArm],
        KeyCode::Char('s') => vec![InputEvent::StopRecording],

        // levels
        KeyCode::Char('[') => vec![InputEvent::TrackVolume(-VOLUME_STEP)],
        KeyCode::Char(']') => vec![InputEvent::TrackVolume(VOLUME_STEP)],
        KeyCode::Char('-') => vec![InputEvent::MetronomeVolume(-VOLUME_STEP)],
        KeyCode::Char('=') => vec![InputEvent::MetronomeVolume(VOLUME_STEP)],

        // live analyzer
        KeyCode::Char('l') => vec![InputEvent::ToggleLive],
        KeyCode::Char(',') => vec![InputEvent::TargetBpm(-BPM_STEP)],
        KeyCode::Char('.') => vec![InputEvent::TargetBpm(BPM_STEP)],

        _ => vec![],
    }
}
