use std::sync::Arc;

use super::click::{ClickShape, ClickVoice};
use super::frame::StereoFrame;
use super::stage::GainRamp;
use super::track::DecodedTrack;
use super::track_id::TrackId;
use super::voice::Voice;
use crate::audio_api::{AudioCommand, VoiceStart};
use crate::config::EngineConfig;

const MAX_VOICES: usize = 8; // original + recording, with plenty of room
const MAX_TRACKS: usize = 16; // registry never grows on the audio thread
const MAX_CLICKS: usize = 16; // hard cap so we wont malloc in audio callback
const BUS_FRAMES: usize = 4096; // bigger device blocks get split

// The audio-rate side. Owned by the output callback; everything reaches it
// through AudioCommand. `frame` is the absolute index of the next frame it
// renders, which is the same count the shared AudioClock publishes.
pub struct Engine {
    sample_rate: u32,
    frame: u64,
    tracks: Vec<(TrackId, Arc<DecodedTrack>)>,
    voices: Vec<Voice>,
    clicks: [ClickVoice; MAX_CLICKS],
    click_shape: ClickShape,
    track_gain: GainRamp,
    click_gain: GainRamp,
    track_bus: Vec<StereoFrame>,
    click_bus: Vec<StereoFrame>,
}

impl Engine {
    pub fn new(sample_rate: u32, config: &EngineConfig) -> Self {
        let ramp = config.audio.volume_ramp_secs;
        Self {
            sample_rate,
            frame: 0,
            tracks: Vec::with_capacity(MAX_TRACKS),
            voices: Vec::with_capacity(MAX_VOICES),
            clicks: [ClickVoice::default(); MAX_CLICKS],
            click_shape: ClickShape::new(&config.metronome, sample_rate),
            track_gain: GainRamp::new(config.audio.track_volume.clamp(0.0, 1.0), ramp, sample_rate),
            click_gain: GainRamp::new(config.audio.metronome_volume.clamp(0.0, 1.0), ramp, sample_rate),
            track_bus: vec![StereoFrame::zero(); BUS_FRAMES],
            click_bus: vec![StereoFrame::zero(); BUS_FRAMES],
        }
    }

    #[cfg(test)]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[cfg(test)]
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    #[cfg(test)]
    pub fn active_clicks(&self) -> usize {
        self.clicks.iter().filter(|c| c.active).count()
    }

    #[cfg(test)]
    pub fn registered_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::RegisterTrack { id, track } => {
                self.tracks.retain(|(existing, _)| *existing != id);
                if self.tracks.len() < MAX_TRACKS {
                    self.tracks.push((id, track));
                }
            }
            AudioCommand::ReleaseTrack(id) => self.tracks.retain(|(existing, _)| *existing != id),
            AudioCommand::ReleaseTracks => {
                self.voices.clear();
                self.tracks.clear();
            }
            AudioCommand::Play { voices, at_frame } => self.start_voices(&voices, at_frame),
            AudioCommand::StopVoices => self.voices.clear(),
            AudioCommand::ScheduleClick { at_frame } => self.schedule_click(at_frame),
            AudioCommand::CancelClicks => {
                let now = self.frame;
                for click in self.clicks.iter_mut() {
                    if click.active && !click.started(now) {
                        click.active = false;
                    }
                }
            }
            AudioCommand::SetTrackGain(g) => self.track_gain.set_target(g.clamp(0.0, 1.0)),
            AudioCommand::SetClickGain(g) => self.click_gain.set_target(g.clamp(0.0, 1.0)),
        }
    }

    fn start_voices(&mut self, starts: &[VoiceStart], at_frame: u64) {
        self.voices.clear();
        for start in starts.iter().take(MAX_VOICES) {
            let Some((_, track)) = self.tracks.iter().find(|(id, _)| *id == start.track) else {
                continue; // never registered, nothing to play
            };
            self.voices.push(Voice::new(
                Arc::clone(track),
                start.offset_secs,
                at_frame,
                self.sample_rate,
            ));
        }
    }

    fn schedule_click(&mut self, at_frame: u64) {
        // what slot do we write to?
        let slot = self.clicks.iter().position(|c| !c.active).unwrap_or(0);
        self.clicks[slot] = ClickVoice::new(at_frame);
    }

    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        for chunk in out.chunks_mut(BUS_FRAMES) {
            self.render_chunk(chunk);
        }
    }

    fn render_chunk(&mut self, out: &mut [StereoFrame]) {
        let n = out.len();
        let start = self.frame;

        let track_bus = &mut self.track_bus[..n];
        track_bus.fill(StereoFrame::zero());
        for voice in self.voices.iter_mut() {
            voice.render_into(track_bus, start);
        }
        self.voices.retain(|v| v.active);

        let click_bus = &mut self.click_bus[..n];
        click_bus.fill(StereoFrame::zero());
        for click in self.clicks.iter_mut() {
            click.render_into(&self.click_shape, click_bus, start);
        }

        for (i, frame) in out.iter_mut().enumerate() {
            *frame = self.track_bus[i].scale(self.track_gain.next());
            *frame += self.click_bus[i].scale(self.click_gain.next());
        }

        self.frame += n as u64;
    }
}
