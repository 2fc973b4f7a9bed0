use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::audio::{AudioClock, DecodedTrack, Microphone};
use crate::audio_api::{AudioCommand, CommandSender};
use crate::capture::{CapturePipeline, Take, save_take};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::live::LiveAnalyzer;
use crate::metronome::Metronome;
use crate::shared::{EngineState, InputEvent, PlayMode, TakeInfo};
use crate::tempo::{DetectionJob, TempoDetector};
use crate::transport::Transport;

const TARGET_BPM_RANGE: (f32, f32) = (20.0, 300.0);

// The whole practice session: one loaded file, its tempo, the click, the
// takes recorded over it and the live analyzer. Owned by the front-end and
// driven from one thread: commands in, `tick` for housekeeping, `state` out.
pub struct PracticeEngine {
    config: EngineConfig,
    commands: CommandSender,
    clock: AudioClock,
    transport: Transport,
    metronome: Metronome,
    capture: CapturePipeline,
    live: LiveAnalyzer,
    detection: Option<DetectionJob>,
    take_dir: Option<PathBuf>,
    take_offset: f64, // track position the current take lines up with
    state: EngineState,
}

impl PracticeEngine {
    pub fn new(commands: CommandSender, clock: AudioClock, mic: Rc<dyn Microphone>, config: EngineConfig) -> Self {
        let transport = Transport::new(commands.clone(), clock.clone(), config.audio.mode_play_delay_secs);
        let metronome = Metronome::new(commands.clone(), clock.clone(), &config.metronome);
        let capture = CapturePipeline::new(Rc::clone(&mic), config.capture.clone());
        let live = LiveAnalyzer::new(mic, config.live.clone());
        let state = EngineState {
            track_volume: config.audio.track_volume.clamp(0.0, 1.0),
            metronome_volume: config.audio.metronome_volume.clamp(0.0, 1.0),
            live_target_bpm: live.target_bpm(),
            ..EngineState::default()
        };
        Self {
            config,
            commands,
            clock,
            transport,
            metronome,
            capture,
            live,
            detection: None,
            take_dir: None,
            take_offset: 0.0,
            state,
        }
    }

    /// Finished takes are also written here as take-NNN.wav / .mp3.
    pub fn with_take_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.take_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ── Loading ───────────────────────────────────────────────────

    pub fn load_path(&mut self, path: &Path) -> EngineResult<()> {
        let track = DecodedTrack::decode_file(path).inspect_err(|e| self.fail(e))?;
        self.load_track(Arc::new(track));
        self.state.file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(())
    }

    pub fn load_bytes(&mut self, bytes: Vec<u8>, extension: Option<&str>) -> EngineResult<()> {
        let track = DecodedTrack::decode(bytes, extension).inspect_err(|e| self.fail(e))?;
        self.load_track(Arc::new(track));
        self.state.file_name = None;
        Ok(())
    }

    /// Replaces the session with a new original and starts detecting its
    /// tempo in the background. Takes of the previous file are dropped.
    pub fn load_track(&mut self, track: Arc<DecodedTrack>) {
        self.metronome.stop();
        if self.capture.is_armed() {
            log::info!("new file loaded, discarding the armed recording");
            self.capture.disarm();
        }
        if let Some(job) = self.detection.take() {
            job.cancel();
        }

        self.transport.reset();
        self.transport.set_original(Arc::clone(&track));

        let detector = TempoDetector::new(self.config.tempo.clone());
        self.detection = Some(DetectionJob::spawn(detector, track));

        self.state.bpm = None;
        self.state.processing = true;
        self.state.error = None;
        self.state.last_take = None;
        self.refresh();
    }

    // ── Transport ─────────────────────────────────────────────────

    /// Play from the paused position with the click, recording if armed; or
    /// pause everything and finalize the take.
    pub fn play_pause(&mut self) {
        if self.transport.is_playing() {
            self.metronome.stop();
            self.transport.stop();
            self.finish_take();
            self.refresh();
            return;
        }

        let mode = self.transport.current_mode();
        let mut offset = self.transport.position_sec();
        if offset >= self.transport.duration_for_mode(mode) {
            offset = 0.0;
        }
        let at = self.clock.now_secs() + self.config.audio.play_delay_secs;
        if !self.transport.play_mode_at(mode, offset, at) {
            return;
        }
        self.start_metronome(at, offset);
        if self.capture.is_armed() {
            self.begin_take();
        }
        self.refresh();
    }

    /// Plays `mode` from the top, without the click or the recorder. A take
    /// in progress is finalized first.
    pub fn play_mode_only(&mut self, mode: PlayMode) {
        self.metronome.stop();
        self.finish_take();
        let at = self.clock.now_secs() + self.config.audio.mode_play_delay_secs;
        if self.transport.play_mode_at(mode, 0.0, at) {
            self.transport.select_mode(mode);
        }
        self.refresh();
    }

    // Same as play_mode_only, except that asking for the mode that is
    // already playing pauses it.
    pub fn toggle_mode(&mut self, mode: PlayMode) {
        if self.transport.playing_mode() == Some(mode) {
            self.pause_playback();
        } else {
            self.play_mode_only(mode);
        }
    }

    pub fn select_mode(&mut self, mode: PlayMode) {
        self.transport.select_mode(mode);
        self.refresh();
    }

    // Stops the audio and the click. A running take is finalized; recording
    // through the pause would stitch the gap into it.
    pub fn pause_playback(&mut self) {
        self.metronome.stop();
        self.transport.stop();
        self.finish_take();
        self.refresh();
    }

    /// Clamps to the current mode. While playing, restarts the voices (and the
    /// click, if it was on) from there; while paused only moves the position.
    /// A take in progress ends at the jump and a new one starts after it.
    pub fn seek(&mut self, secs: f64) -> f64 {
        if secs.is_nan() {
            return self.transport.position_sec();
        }
        let mode = self.transport.current_mode();
        let target = secs.clamp(0.0, self.transport.duration_for_mode(mode));
        if self.transport.is_playing() {
            let clicking = self.metronome.is_running();
            let recording = self.capture.is_recording();
            if recording {
                self.finish_take();
            }
            let at = self.clock.now_secs() + self.config.audio.mode_play_delay_secs;
            self.transport.play_mode_at(mode, target, at);
            if clicking {
                self.start_metronome(at, target);
            }
            if recording {
                self.begin_take();
            }
        } else {
            self.transport.seek(target);
        }
        self.refresh();
        target
    }

    pub fn skip(&mut self, delta_secs: f64) -> f64 {
        let position = self.transport.position_sec();
        self.seek(position + delta_secs)
    }

    // Aligns the click grid to the track: beat k sits at k * 60/bpm seconds
    // into the audio. Without a tempo there is no click.
    fn start_metronome(&mut self, at: f64, offset: f64) {
        let Some(bpm) = self.state.bpm else {
            log::debug!("no tempo yet, playing without the click");
            return;
        };
        self.metronome.set_bpm(bpm);
        let period = 60.0 / bpm as f64;
        let into_beat = offset.rem_euclid(period);
        let first = if into_beat < 1e-9 { at } else { at + (period - into_beat) };
        self.metronome.start(first);
    }

    // ── Recording ─────────────────────────────────────────────────

    /// Opens the microphone. Starts recording straight away when playing.
    pub fn arm_recording(&mut self) -> EngineResult<()> {
        if let Err(e) = self.capture.arm() {
            self.fail(&e);
            self.refresh();
            return Err(e);
        }
        self.state.error = None;
        if self.transport.is_playing() {
            self.begin_take();
        }
        self.refresh();
        Ok(())
    }

    // Releases the microphone. A take still being recorded is thrown away.
    pub fn disarm_recording(&mut self) {
        self.capture.disarm();
        self.refresh();
    }

    pub fn toggle_arm(&mut self) {
        if self.capture.is_armed() {
            self.disarm_recording();
        } else {
            // failure is already in the published state
            let _ = self.arm_recording();
        }
    }

    // Finalizes the current take but stays armed and keeps playing.
    pub fn stop_recording(&mut self) {
        self.finish_take();
        self.refresh();
    }

    // Starts the recorder against the running playback. Input from before the
    // voices start is dropped, and the take remembers the track position it
    // begins at so it can be lined up with the original afterwards.
    fn begin_take(&mut self) {
        if self.capture.is_recording() {
            return;
        }
        let Some(start) = self.transport.session_start() else {
            return;
        };
        let lead_in = (start - self.clock.now_secs()).max(0.0);
        if self.capture.start(lead_in) {
            self.take_offset = self.transport.position_sec();
        }
    }

    fn finish_take(&mut self) {
        match self.capture.stop() {
            Ok(Some(take)) => self.adopt_take(take),
            Ok(None) => {}
            Err(e) => {
                log::error!("take lost: {}", e);
                self.fail(&e);
            }
        }
    }

    // Decode the take back into a track so it can be played in the other
    // modes. Silence in front puts it at the position it was recorded against.
    fn adopt_take(&mut self, take: Take) {
        let offset_secs = std::mem::take(&mut self.take_offset);
        if take.samples == 0 {
            log::info!("empty take ignored");
            return;
        }
        match DecodedTrack::from_wav_bytes(&take.wav) {
            Ok(track) => {
                self.transport.append_track(Arc::new(track.delayed(offset_secs)));
            }
            Err(e) => {
                log::warn!("could not read back the take: {}", e);
                self.fail(&e);
            }
        }

        let saved = match &self.take_dir {
            Some(dir) if self.config.capture.save_takes => match save_take(dir, &take) {
                Ok(saved) => Some(saved),
                Err(e) => {
                    log::warn!("could not save take: {}", e);
                    None
                }
            },
            _ => None,
        };
        self.state.last_take = Some(TakeInfo { take: Arc::new(take), saved, offset_secs });
    }

    // ── Levels ────────────────────────────────────────────────────

    pub fn set_track_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.track_volume = volume;
        self.commands.send(AudioCommand::SetTrackGain(volume));
    }

    pub fn set_metronome_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.metronome_volume = volume;
        self.commands.send(AudioCommand::SetClickGain(volume));
    }

    // ── Live analysis ─────────────────────────────────────────────

    pub fn start_live(&mut self) -> EngineResult<()> {
        if let Err(e) = self.live.start() {
            self.fail(&e);
            self.refresh();
            return Err(e);
        }
        self.refresh();
        Ok(())
    }

    pub fn stop_live(&mut self) {
        self.live.stop();
        self.refresh();
    }

    pub fn toggle_live(&mut self) {
        if self.live.is_running() {
            self.stop_live();
        } else {
            let _ = self.start_live();
        }
    }

    pub fn set_target_bpm(&mut self, bpm: f32) {
        self.live.set_target_bpm(bpm);
        self.refresh();
    }

    // ── Loop plumbing ─────────────────────────────────────────────

    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PlayPause => self.play_pause(),
            InputEvent::PlayModeOnly(mode) => self.play_mode_only(mode),
            InputEvent::ToggleMode(mode) => self.toggle_mode(mode),
            InputEvent::SelectMode(mode) => self.select_mode(mode),
            InputEvent::Pause => self.pause_playback(),
            InputEvent::Skip(delta) => {
                self.skip(delta);
            }
            InputEvent::SeekTo(secs) => {
                self.seek(secs);
            }
            InputEvent::ToggleArm => self.toggle_arm(),
            InputEvent::StopRecording => self.stop_recording(),
            InputEvent::TrackVolume(delta) => self.set_track_volume(self.state.track_volume + delta),
            InputEvent::MetronomeVolume(delta) => {
                self.set_metronome_volume(self.state.metronome_volume + delta)
            }
            InputEvent::ToggleLive => self.toggle_live(),
            InputEvent::TargetBpm(delta) => {
                let (lo, hi) = TARGET_BPM_RANGE;
                self.set_target_bpm((self.live.target_bpm() + delta).clamp(lo, hi));
            }
            InputEvent::Quit => {}
        }
    }

    /// Housekeeping, every ~25 ms: keeps the click fed, drains the recorder,
    /// collects the tempo and notices the end of the audio.
    pub fn tick(&mut self) {
        self.metronome.tick();
        self.capture.pump();
        self.poll_detection();
        self.transport.free_released();

        if self.transport.is_finished() {
            log::info!("end of audio");
            self.metronome.stop();
            self.transport.stop();
            self.finish_take();
        }

        if self.live.is_running() {
            self.state.live = self.live.poll();
        }
        self.refresh();
    }

    fn poll_detection(&mut self) {
        let Some(result) = self.detection.as_ref().and_then(DetectionJob::try_result) else {
            return;
        };
        self.detection = None;
        self.state.processing = false;
        match result {
            Ok(bpm) => {
                self.state.bpm = Some(bpm);
                self.metronome.set_bpm(bpm);
                self.live.set_target_bpm(bpm);
            }
            Err(EngineError::Cancelled) => {}
            Err(e) => {
                log::warn!("{}", e);
                self.fail(&e);
            }
        }
    }

    /// Stops everything and lets go of the devices. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Some(job) = self.detection.take() {
            job.cancel();
        }
        self.live.stop();
        self.capture.disarm();
        self.metronome.stop();
        self.transport.stop();
        self.refresh();
    }

    fn fail(&mut self, error: &EngineError) {
        self.state.error = Some(error.to_string());
    }

    fn refresh(&mut self) {
        let transport = &self.transport;
        let state = &mut self.state;
        state.position_sec = transport.position_sec();
        state.duration_sec = transport.duration_sec();
        state.selected_mode = transport.selected_mode();
        state.playing_mode = transport.playing_mode();
        state.playing = transport.is_playing();
        state.track_count = transport.tracks().len();
        state.armed = self.capture.is_armed();
        state.recording = self.capture.is_recording();
        state.metronome_running = self.metronome.is_running();
        state.live_running = self.live.is_running();
        state.live_target_bpm = self.live.target_bpm();
        if !state.live_running {
            state.live = Default::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::audio::FakeMicrophone;
    use crate::tempo::test_signals::click_track;

    const OUT_RATE: u32 = 48_000;

    struct Rig {
        engine: PracticeEngine,
        clock: AudioClock,
        rx: Receiver<AudioCommand>,
    }

    impl Rig {
        fn with_mic(mic: FakeMicrophone) -> Self {
            let (tx, rx) = crossbeam_channel::unbounded();
            let clock = AudioClock::new(OUT_RATE);
            let engine = PracticeEngine::new(
                CommandSender::new(tx),
                clock.clone(),
                Rc::new(mic.clone()),
                EngineConfig::default(),
            );
            Self { engine, clock, rx }
        }

        fn new() -> Self {
            Self::with_mic(FakeMicrophone::new(OUT_RATE))
        }

        fn drain(&self) -> Vec<AudioCommand> {
            self.rx.try_iter().collect()
        }

        // loads and blocks until the background detection reports
        fn load(&mut self, samples: Vec<f32>, rate: u32) {
            let track = DecodedTrack::from_mono(rate, samples).unwrap();
            self.engine.load_track(Arc::new(track));
            let deadline = Instant::now() + Duration::from_secs(60);
            while self.engine.state().processing {
                assert!(Instant::now() < deadline, "detection never finished");
                std::thread::sleep(Duration::from_millis(5));
                self.engine.tick();
            }
            self.drain();
        }

        fn advance_secs(&self, secs: f64) {
            self.clock.advance((secs * OUT_RATE as f64) as u64);
        }
    }

    fn tone(secs: f32, rate: u32) -> Vec<f32> {
        (0..(secs * rate as f32) as usize)
            .map(|i| 0.3 * (std::f32::consts::TAU * 220.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    fn play_frame(cmds: &[AudioCommand]) -> Option<u64> {
        cmds.iter().find_map(|c| match c {
            AudioCommand::Play { at_frame, .. } => Some(*at_frame),
            _ => None,
        })
    }

    fn click_frames(cmds: &[AudioCommand]) -> Vec<u64> {
        cmds.iter()
            .filter_map(|c| match c {
                AudioCommand::ScheduleClick { at_frame } => Some(*at_frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn detected_tempo_drives_the_click() {
        let mut rig = Rig::new();
        rig.load(click_track(120.0, 20.0, 22_050), 22_050);
        assert_eq!(rig.engine.state().bpm, Some(120.0));
        assert!(rig.engine.state().error.is_none());

        rig.engine.play_pause();
        let cmds = rig.drain();
        let start = play_frame(&cmds).unwrap();
        assert_eq!(start, 1_440); // 30ms ahead
        assert_eq!(click_frames(&cmds), vec![1_440]);
        assert!(rig.engine.state().playing);
        assert!(rig.engine.state().metronome_running);

        rig.advance_secs(0.5);
        rig.engine.tick();
        assert_eq!(click_frames(&rig.drain()), vec![1_440 + 24_000]);
    }

    #[test]
    fn failed_detection_still_plays_without_click() {
        let mut rig = Rig::new();
        rig.load(vec![0.0; 22_050 * 3], 22_050);
        let state = rig.engine.state();
        assert!(state.bpm.is_none());
        assert!(!state.processing);
        assert!(state.error.as_deref().unwrap_or("").contains("silent"));

        rig.engine.play_pause();
        let cmds = rig.drain();
        assert!(play_frame(&cmds).is_some());
        assert!(click_frames(&cmds).is_empty());
        assert!(!rig.engine.state().metronome_running);
    }

    #[test]
    fn seek_while_paused_clamps_and_moves_position() {
        let mut rig = Rig::new();
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(120.0, 8_000)).unwrap()));
        assert_eq!(rig.engine.seek(-5.0), 0.0);
        assert_eq!(rig.engine.state().position_sec, 0.0);
        assert_eq!(rig.engine.seek(500.0), 120.0);
        assert_eq!(rig.engine.state().position_sec, 120.0);
        assert!(!rig.engine.state().playing);
        assert_eq!(rig.engine.skip(-30.0), 90.0);
    }

    #[test]
    fn resumes_where_it_paused_and_realigns_click() {
        let mut rig = Rig::new();
        rig.load(click_track(120.0, 20.0, 22_050), 22_050);
        rig.engine.seek(1.25);
        rig.engine.play_pause();
        let cmds = rig.drain();
        let start = play_frame(&cmds).unwrap();
        // 1.25s is half a beat past beat 2, so the next beat is 0.25s after the start
        assert_eq!(click_frames(&cmds), Vec::<u64>::new());
        rig.advance_secs(0.2);
        rig.engine.tick();
        assert_eq!(click_frames(&rig.drain()), vec![start + 12_000]);

        match cmds.iter().find(|c| matches!(c, AudioCommand::Play { .. })) {
            Some(AudioCommand::Play { voices, .. }) => assert!((voices[0].offset_secs - 1.25).abs() < 1e-9),
            _ => panic!("no play command"),
        }
    }

    #[test]
    fn end_of_audio_stops_and_next_play_starts_over() {
        let mut rig = Rig::new();
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(1.0, 8_000)).unwrap()));
        rig.engine.play_pause();
        rig.advance_secs(1.25);
        rig.engine.tick();
        assert!(!rig.engine.state().playing);
        assert_eq!(rig.engine.state().position_sec, 1.0);

        rig.drain();
        rig.engine.play_pause();
        let cmds = rig.drain();
        match cmds.iter().find(|c| matches!(c, AudioCommand::Play { .. })) {
            Some(AudioCommand::Play { voices, .. }) => assert_eq!(voices[0].offset_secs, 0.0),
            _ => panic!("no play command"),
        }
    }

    #[test]
    fn recorded_take_becomes_a_track_and_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mic = FakeMicrophone::new(OUT_RATE);
        let mut rig = Rig::with_mic(mic.clone());
        rig.engine = rig.engine.with_take_dir(dir.path());
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(10.0, 8_000)).unwrap()));

        rig.engine.arm_recording().unwrap();
        assert!(rig.engine.state().armed);
        assert!(!rig.engine.state().recording);

        rig.engine.play_pause();
        assert!(rig.engine.state().recording);
        mic.feed(&tone(0.5, OUT_RATE));
        rig.engine.tick();
        mic.feed(&tone(0.5, OUT_RATE));
        rig.engine.play_pause();

        let state = rig.engine.state();
        assert!(!state.playing);
        assert!(!state.recording);
        assert!(state.armed);
        assert_eq!(state.track_count, 2);
        let info = state.last_take.as_ref().unwrap();
        // the 30ms before the voices start are not part of the take
        assert_eq!(info.take.samples, OUT_RATE as usize - 1_440);
        assert_eq!(info.offset_secs, 0.0);
        let saved = info.saved.as_ref().unwrap();
        assert_eq!(saved.wav, dir.path().join("take-001.wav"));
        assert!(saved.wav.exists());

        let recording = rig.engine.transport().tracks().latest_recording().unwrap();
        assert!((recording.duration_secs() - 0.97).abs() < 1e-9);
        assert_eq!(rig.engine.transport().duration_for_mode(PlayMode::Combined), 10.0);
    }

    #[test]
    fn take_recorded_after_a_resume_lines_up_with_the_original() {
        let mic = FakeMicrophone::new(OUT_RATE);
        let mut rig = Rig::with_mic(mic.clone());
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(10.0, 8_000)).unwrap()));
        rig.engine.seek(5.0);
        rig.engine.arm_recording().unwrap();

        rig.engine.play_pause();
        let played = tone(1.0, OUT_RATE);
        mic.feed(&played);
        rig.advance_secs(1.0);
        rig.engine.handle_input(InputEvent::Pause);

        // pausing ends the take, so nothing said during the pause ends up in it
        let state = rig.engine.state();
        assert!(!state.recording);
        assert!(state.armed);
        assert_eq!(state.track_count, 2);
        assert_eq!(state.last_take.as_ref().unwrap().offset_secs, 5.0);
        mic.feed(&[0.9; 4_800]);
        rig.engine.tick();

        let recording = rig.engine.transport().tracks().latest_recording().unwrap();
        let start = 5 * OUT_RATE as usize;
        assert!((recording.duration_secs() - (5.0 + 0.97)).abs() < 1e-9);
        assert!(recording.channel(0)[..start].iter().all(|s| *s == 0.0));
        // first kept sample is the one the mic heard as the voices started
        assert!((recording.channel(0)[start + 100] - played[1_440 + 100]).abs() < 1e-4);

        rig.drain();
        rig.engine.play_mode_only(PlayMode::Combined);
        match rig.drain().iter().find(|c| matches!(c, AudioCommand::Play { .. })) {
            Some(AudioCommand::Play { voices, .. }) => {
                assert_eq!(voices.len(), 2);
                assert!(voices.iter().all(|v| v.offset_secs == 0.0));
            }
            _ => panic!("no play command"),
        }
    }

    #[test]
    fn seeking_mid_take_starts_a_new_one_at_the_jump() {
        let mic = FakeMicrophone::new(OUT_RATE);
        let mut rig = Rig::with_mic(mic.clone());
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(10.0, 8_000)).unwrap()));
        rig.engine.arm_recording().unwrap();
        rig.engine.play_pause();
        mic.feed(&tone(0.5, OUT_RATE));
        rig.advance_secs(0.5);

        rig.engine.seek(3.0);
        assert!(rig.engine.state().recording);
        assert_eq!(rig.engine.state().track_count, 2);

        mic.feed(&tone(0.5, OUT_RATE));
        rig.advance_secs(0.5);
        rig.engine.play_pause();
        let state = rig.engine.state();
        assert_eq!(state.track_count, 3);
        assert_eq!(state.last_take.as_ref().unwrap().offset_secs, 3.0);
        let recording = rig.engine.transport().tracks().latest_recording().unwrap();
        assert!((recording.duration_secs() - 3.48).abs() < 1e-9);
    }

    #[test]
    fn disarm_mid_take_discards_it() {
        let mic = FakeMicrophone::new(OUT_RATE);
        let mut rig = Rig::with_mic(mic.clone());
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(10.0, 8_000)).unwrap()));
        rig.engine.arm_recording().unwrap();
        rig.engine.play_pause();
        mic.feed(&tone(0.5, OUT_RATE));
        rig.engine.tick();

        rig.engine.disarm_recording();
        assert_eq!(mic.released(), 1);
        assert!(!rig.engine.state().armed);
        assert!(!rig.engine.state().recording);
        assert!(rig.engine.state().playing);

        rig.engine.play_pause();
        assert_eq!(rig.engine.state().track_count, 1);
        assert!(rig.engine.state().last_take.is_none());
    }

    #[test]
    fn denied_microphone_is_reported() {
        let mut rig = Rig::with_mic(FakeMicrophone::unavailable());
        assert!(rig.engine.arm_recording().is_err());
        let state = rig.engine.state();
        assert!(!state.armed);
        assert!(state.error.as_deref().unwrap_or("").contains("microphone"));

        rig.engine.toggle_live();
        assert!(!rig.engine.state().live_running);
    }

    #[test]
    fn toggling_a_mode_plays_it_from_the_top_or_pauses_it() {
        let mut rig = Rig::new();
        rig.engine.load_track(Arc::new(DecodedTrack::from_mono(8_000, tone(10.0, 8_000)).unwrap()));
        rig.engine.seek(4.0);

        // nothing recorded yet
        rig.engine.toggle_mode(PlayMode::Recording);
        assert!(!rig.engine.state().playing);

        rig.engine.toggle_mode(PlayMode::Original);
        assert_eq!(rig.engine.state().playing_mode, Some(PlayMode::Original));
        assert_eq!(rig.engine.state().position_sec, 0.0);
        assert!(!rig.engine.state().metronome_running);

        rig.engine.toggle_mode(PlayMode::Original);
        assert!(!rig.engine.state().playing);
    }

    #[test]
    fn volumes_are_clamped() {
        let mut rig = Rig::new();
        rig.engine.set_track_volume(1.7);
        rig.engine.set_metronome_volume(-0.2);
        rig.engine.set_track_volume(f32::NAN);
        assert_eq!(rig.engine.state().track_volume, 1.0);
        assert_eq!(rig.engine.state().metronome_volume, 0.0);

        let cmds = rig.drain();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], AudioCommand::SetTrackGain(v) if v == 1.0));
        assert!(matches!(cmds[1], AudioCommand::SetClickGain(v) if v == 0.0));
    }

    #[test]
    fn live_analysis_runs_alongside_recording() {
        let mic = FakeMicrophone::new(OUT_RATE);
        let mut rig = Rig::with_mic(mic.clone());
        rig.engine.handle_input(InputEvent::ToggleLive);
        rig.engine.handle_input(InputEvent::ToggleArm);
        assert_eq!(mic.open_streams(), 2);
        assert!(rig.engine.state().live_running);

        rig.engine.handle_input(InputEvent::TargetBpm(-20.0));
        assert_eq!(rig.engine.state().live_target_bpm, 100.0);

        rig.engine.shutdown();
        rig.engine.shutdown();
        assert_eq!(mic.open_streams(), 0);
        assert_eq!(mic.released(), 2);
        assert!(!rig.engine.state().live_running);
    }
}
