use crate::audio::AudioClock;
use crate::audio_api::{AudioCommand, CommandSender};
use crate::config::MetronomeConfig;

const DEFAULT_BPM: f32 = 120.0;

// Look-ahead click scheduler. The control loop calls `tick` every few tens of
// milliseconds; each call hands the renderer every click due before
// `now + schedule_ahead`, each pinned to an exact output frame, so timer
// jitter on the control side never reaches the audio.
pub struct Metronome {
    commands: CommandSender,
    clock: AudioClock,
    schedule_ahead_secs: f64,
    bpm: f32,
    next_click: f64, // seconds on the audio clock
    running: bool,
}

impl Metronome {
    pub fn new(commands: CommandSender, clock: AudioClock, config: &MetronomeConfig) -> Self {
        Self {
            commands,
            clock,
            schedule_ahead_secs: config.schedule_ahead_secs.max(0.0),
            bpm: DEFAULT_BPM,
            next_click: 0.0,
            running: false,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Only positive, finite values are taken. Returns whether it was applied.
    pub fn set_bpm(&mut self, bpm: f32) -> bool {
        if bpm > 0.0 && bpm.is_finite() {
            self.bpm = bpm;
            true
        } else {
            log::debug!("ignoring invalid bpm {}", bpm);
            false
        }
    }

    pub fn start(&mut self, at_secs: f64) {
        if self.running {
            self.stop();
        }
        self.running = true;
        self.next_click = at_secs;
        log::debug!("metronome start at {:.3}s, {} bpm", at_secs, self.bpm);
        self.tick();
    }

    // Clicks already handed to the renderer that have started keep sounding.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.commands.send(AudioCommand::CancelClicks);
        log::debug!("metronome stop");
    }

    /// Schedules every click inside the look-ahead window and returns their
    /// times. Clicks that are already in the past are skipped, not played late.
    pub fn tick(&mut self) -> Vec<f64> {
        if !self.running {
            return Vec::new();
        }
        let now = self.clock.now_secs();
        let period = 60.0 / self.bpm as f64;

        if self.next_click < now {
            let missed = ((now - self.next_click) / period).ceil();
            log::debug!("metronome late, skipping {} click(s)", missed);
            self.next_click += missed * period;
        }

        let horizon = now + self.schedule_ahead_secs;
        let mut scheduled = Vec::new();
        while self.next_click < horizon {
            self.commands.send(AudioCommand::ScheduleClick {
                at_frame: self.clock.secs_to_frame(self.next_click),
            });
            scheduled.push(self.next_click);
            self.next_click += period;
        }
        scheduled
    }
}
