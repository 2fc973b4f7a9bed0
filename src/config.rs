// engine settings, read from <project_dir>/.backtrack/config.json on startup.
// every field has a default so a partial (or missing) file is fine.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::StageSpec;
use crate::error::EngineResult;
use crate::live::OnsetProfile;

pub const BACKTRACK_DIR: &str = ".backtrack";
const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub metronome: MetronomeConfig,
    pub tempo: TempoConfig,
    pub capture: CaptureConfig,
    pub live: LiveConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub track_volume: f32,
    pub metronome_volume: f32,
    pub volume_ramp_secs: f32, // time constant for level changes
    pub play_delay_secs: f64, // play/pause starts this far ahead of the clock
    pub mode_play_delay_secs: f64, // mode rows and seeks
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            track_volume: 0.9,
            metronome_volume: 0.7,
            volume_ramp_secs: 0.01,
            play_delay_secs: 0.03,
            mode_play_delay_secs: 0.02,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub schedule_ahead_secs: f64,
    pub tick_ms: u64,
    pub frequency_hz: f32,
    pub attack_secs: f32,
    pub decay_secs: f32,
    pub duration_secs: f32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            schedule_ahead_secs: 0.1,
            tick_ms: 25,
            frequency_hz: 1000.0,
            attack_secs: 0.001,
            decay_secs: 0.05,
            duration_secs: 0.06,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub window_secs: f64,
    pub hop_secs: f64,
    // the window/hop actually used never go below these
    pub min_window_secs: f64,
    pub min_hop_secs: f64,
    pub min_tail_secs: f64, // shorter trailing windows are skipped
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub fallback_sample_rate: u32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            window_secs: 8.0,
            hop_secs: 4.0,
            min_window_secs: 15.0,
            min_hop_secs: 5.0,
            min_tail_secs: 10.0,
            min_bpm: 40.0,
            max_bpm: 208.0,
            frame_size: 1024,
            hop_size: 256,
            fallback_sample_rate: 44_100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub chunk_size: usize,
    pub ring_secs: f32, // how much audio the callback can get ahead of housekeeping
    pub mp3_target_peak: f32,
    pub save_takes: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            ring_secs: 4.0,
            mp3_target_peak: 0.95,
            save_takes: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub profile: OnsetProfile,
    pub frame_size: usize,
    pub bpm_window_secs: f32,
    pub analysis_interval_secs: f32,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub min_confidence: f32,
    pub min_hits: usize, // hits needed inside the window before a tempo is trusted
    pub bpm_smoothing: f32, // weight of the new estimate
    pub silence_timeout_secs: f32,
    pub target_bpm: f32,
    pub stages: Vec<StageSpec>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            profile: OnsetProfile::standard(),
            frame_size: 256,
            bpm_window_secs: 8.0,
            analysis_interval_secs: 1.0,
            min_bpm: 40.0,
            max_bpm: 208.0,
            min_confidence: 0.3,
            min_hits: 3,
            bpm_smoothing: 0.5,
            silence_timeout_secs: 2.0,
            target_bpm: 120.0,
            stages: vec![
                StageSpec::HighPass { cutoff_hz: 100.0, q: 0.707 },
                StageSpec::LowPass { cutoff_hz: 180.0, q: 0.707 },
            ],
        }
    }
}

// <project_dir>/.backtrack/config.json
fn config_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(BACKTRACK_DIR).join(CONFIG_FILE)
}

pub fn load_config(project_dir: &Path) -> Option<EngineConfig> {
    let path = config_file_path(project_dir);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("ignoring invalid config {}: {}", path.display(), e);
            None
        }
    }
}

pub fn save_config(project_dir: &Path, config: &EngineConfig) -> EngineResult<()> {
    let path = config_file_path(project_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, json)?;
    Ok(())
}
