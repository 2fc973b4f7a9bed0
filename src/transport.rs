use std::sync::Arc;

use crate::audio::{AudioClock, DecodedTrack, TrackId, next_track_id};
use crate::audio_api::{AudioCommand, CommandSender, VoiceStart};
use crate::shared::PlayMode;

struct TrackEntry {
    id: TrackId,
    track: Arc<DecodedTrack>,
}

/// Append-only list of tracks. Index 0 is the original, the last entry (when
/// there is more than one) is the latest recording.
#[derive(Default)]
pub struct TrackSet {
    entries: Vec<TrackEntry>,
}

impl TrackSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn original(&self) -> Option<&Arc<DecodedTrack>> {
        self.entries.first().map(|e| &e.track)
    }

    pub fn latest_recording(&self) -> Option<&Arc<DecodedTrack>> {
        if self.entries.len() > 1 { self.entries.last().map(|e| &e.track) } else { None }
    }

    fn for_mode(&self, mode: PlayMode) -> Vec<&TrackEntry> {
        let original = self.entries.first();
        let recording = if self.entries.len() > 1 { self.entries.last() } else { None };
        match mode {
            PlayMode::Original => original.into_iter().collect(),
            PlayMode::Recording => recording.into_iter().collect(),
            PlayMode::Combined => original.into_iter().chain(recording).collect(),
        }
    }
}

struct PlaybackSession {
    mode: PlayMode,
    tracks: Vec<(TrackId, f64)>, // id, duration
    start_clock: f64,
    offset: f64,
    duration: f64,
}

impl PlaybackSession {
    fn position(&self, now: f64) -> f64 {
        (self.offset + (now - self.start_clock).max(0.0)).min(self.duration)
    }
}

// One playback interface for every mode: play(offset), stop, position,
// duration. All voices of a session share one start frame and one offset.
pub struct Transport {
    commands: CommandSender,
    clock: AudioClock,
    restart_delay_secs: f64,
    tracks: TrackSet,
    retired: Vec<Arc<DecodedTrack>>, // released to the renderer, freed here later
    session: Option<PlaybackSession>,
    selected_mode: PlayMode,
    last_offset: f64,
}

impl Transport {
    pub fn new(commands: CommandSender, clock: AudioClock, restart_delay_secs: f64) -> Self {
        Self {
            commands,
            clock,
            restart_delay_secs: restart_delay_secs.max(0.0),
            tracks: TrackSet::default(),
            retired: Vec::new(),
            session: None,
            selected_mode: PlayMode::Original,
            last_offset: 0.0,
        }
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    /// Sets index 0. Only works on an empty set; `reset` first to replace it.
    pub fn set_original(&mut self, track: Arc<DecodedTrack>) -> Option<TrackId> {
        if !self.tracks.is_empty() {
            log::warn!("original already set, reset the transport first");
            return None;
        }
        Some(self.push(track))
    }

    /// Appends a recording. The one it replaces can no longer be played, so
    /// the renderer forgets it; this side keeps it in the set.
    pub fn append_track(&mut self, track: Arc<DecodedTrack>) -> TrackId {
        if let Some(previous) = self.tracks.entries.last().filter(|_| self.tracks.len() > 1) {
            self.commands.send(AudioCommand::ReleaseTrack(previous.id));
        }
        self.push(track)
    }

    fn push(&mut self, track: Arc<DecodedTrack>) -> TrackId {
        let id = next_track_id();
        log::info!("track {} added ({:.2}s)", self.tracks.len(), track.duration_secs());
        self.commands.send(AudioCommand::RegisterTrack { id, track: Arc::clone(&track) });
        self.tracks.entries.push(TrackEntry { id, track });
        id
    }

    pub fn reset(&mut self) {
        self.stop();
        self.commands.send(AudioCommand::ReleaseTracks);
        self.retired.extend(self.tracks.entries.drain(..).map(|e| e.track));
        self.last_offset = 0.0;
        self.selected_mode = PlayMode::Original;
    }

    // Drops released tracks once nothing else holds them, i.e. once the
    // renderer has processed the release. Called from housekeeping.
    pub fn free_released(&mut self) -> usize {
        let before = self.retired.len();
        self.retired.retain(|t| Arc::strong_count(t) > 1);
        before - self.retired.len()
    }

    pub fn duration_for_mode(&self, mode: PlayMode) -> f64 {
        self.tracks
            .for_mode(mode)
            .iter()
            .map(|e| e.track.duration_secs())
            .fold(0.0, f64::max)
    }

    /// Starts `mode` from `offset` after the default restart delay.
    pub fn play_mode(&mut self, mode: PlayMode, offset: f64) -> bool {
        let at = self.clock.now_secs() + self.restart_delay_secs;
        self.play_mode_at(mode, offset, at)
    }

    /// Starts every track of `mode` at audio-clock time `at_secs`. Returns
    /// false, leaving everything as it was, when the mode has no tracks.
    pub fn play_mode_at(&mut self, mode: PlayMode, offset: f64, at_secs: f64) -> bool {
        let entries = self.tracks.for_mode(mode);
        if entries.is_empty() {
            log::debug!("nothing to play for {:?}", mode);
            return false;
        }

        let duration = self.duration_for_mode(mode);
        let offset = offset.clamp(0.0, duration);
        let voices = entries
            .iter()
            .map(|e| VoiceStart {
                track: e.id,
                offset_secs: offset.min(e.track.duration_secs()),
            })
            .collect();
        let tracks = entries.iter().map(|e| (e.id, e.track.duration_secs())).collect();

        // the renderer drops the old voices when it gets the new Play
        self.session = None;
        self.commands.send(AudioCommand::Play {
            voices,
            at_frame: self.clock.secs_to_frame(at_secs),
        });
        self.session = Some(PlaybackSession { mode, tracks, start_clock: at_secs, offset, duration });
        log::info!("playing {:?} from {:.2}s", mode, offset);
        true
    }

    // The position at stop becomes the offset for the next play. Idempotent.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            self.last_offset = session.position(self.clock.now_secs());
            self.commands.send(AudioCommand::StopVoices);
            log::debug!("stopped at {:.2}s", self.last_offset);
        }
    }

    /// Clamps to the current mode's length. Restarts playback from there if a
    /// session is running, otherwise just moves the paused position.
    pub fn seek(&mut self, secs: f64) -> f64 {
        let mode = self.current_mode();
        let target = secs.clamp(0.0, self.duration_for_mode(mode));
        if self.session.is_some() {
            self.play_mode(mode, target);
        } else {
            self.last_offset = target;
        }
        target
    }

    pub fn position_sec(&self) -> f64 {
        match &self.session {
            Some(session) => session.position(self.clock.now_secs()),
            None => self.last_offset,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    // audio-clock time the running session's voices start
    pub fn session_start(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.start_clock)
    }

    pub fn is_finished(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.position(self.clock.now_secs()) >= s.duration)
    }

    /// Tracks of the running session that still have audio at `position`.
    pub fn audible_at(&self, position: f64) -> Vec<TrackId> {
        match &self.session {
            Some(session) => session
                .tracks
                .iter()
                .filter(|(_, duration)| position < *duration)
                .map(|(id, _)| *id)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn playing_mode(&self) -> Option<PlayMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    pub fn selected_mode(&self) -> PlayMode {
        self.selected_mode
    }

    pub fn select_mode(&mut self, mode: PlayMode) {
        self.selected_mode = mode;
    }

    // playing mode wins over the selected one
    pub fn current_mode(&self) -> PlayMode {
        self.playing_mode().unwrap_or(self.selected_mode)
    }

    pub fn duration_sec(&self) -> f64 {
        self.duration_for_mode(self.current_mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    const RATE: u32 = 100;

    fn transport() -> (Transport, AudioClock, Receiver<AudioCommand>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let clock = AudioClock::new(RATE);
        let transport = Transport::new(CommandSender::new(tx), clock.clone(), 0.0);
        (transport, clock, rx)
    }

    fn silent(secs: f64) -> Arc<DecodedTrack> {
        let len = (secs * RATE as f64) as usize;
        Arc::new(DecodedTrack::from_mono(RATE, vec![0.0; len]).unwrap())
    }

    #[test]
    fn seek_while_paused_clamps() {
        let (mut t, _clock, _rx) = transport();
        t.set_original(silent(120.0));

        assert_eq!(t.seek(-5.0), 0.0);
        assert_eq!(t.position_sec(), 0.0);
        assert_eq!(t.seek(500.0), 120.0);
        assert_eq!(t.position_sec(), 120.0);
        assert_eq!(t.seek(33.5), 33.5);
        assert_eq!(t.position_sec(), 33.5);
        assert!(!t.is_playing());
    }

    #[test]
    fn combined_runs_for_the_longest_track() {
        let (mut t, clock, rx) = transport();
        let original = t.set_original(silent(10.0)).unwrap();
        let recording = t.append_track(silent(6.0));
        let _ = rx.try_iter().count();

        assert!(t.play_mode(PlayMode::Combined, 0.0));
        assert_eq!(t.duration_for_mode(PlayMode::Combined), 10.0);

        match rx.try_recv() {
            Ok(AudioCommand::Play { voices, at_frame }) => {
                assert_eq!(at_frame, 0);
                let ids: Vec<TrackId> = voices.iter().map(|v| v.track).collect();
                assert_eq!(ids, vec![original, recording]);
            }
            other => panic!("expected Play, got {:?}", other.map(|_| ())),
        }

        clock.advance(700);
        assert!((t.position_sec() - 7.0).abs() < 1e-9);
        assert_eq!(t.audible_at(t.position_sec()), vec![original]);
        assert!(!t.is_finished());

        clock.advance(400);
        assert_eq!(t.position_sec(), 10.0);
        assert!(t.is_finished());
    }

    #[test]
    fn recording_mode_needs_a_recording() {
        let (mut t, _clock, rx) = transport();
        t.set_original(silent(5.0));
        let _ = rx.try_iter().count();
        assert!(!t.play_mode(PlayMode::Recording, 0.0));
        assert!(rx.try_recv().is_err());
        assert_eq!(t.playing_mode(), None);
    }

    #[test]
    fn voice_offsets_clamp_per_track() {
        let (mut t, _clock, rx) = transport();
        t.set_original(silent(10.0));
        t.append_track(silent(6.0));
        let _ = rx.try_iter().count();

        t.play_mode(PlayMode::Combined, 8.0);
        if let Ok(AudioCommand::Play { voices, .. }) = rx.try_recv() {
            assert_eq!(voices[0].offset_secs, 8.0);
            assert_eq!(voices[1].offset_secs, 6.0);
        } else {
            panic!("expected Play");
        }
    }

    #[test]
    fn stop_keeps_position_and_is_idempotent() {
        let (mut t, clock, rx) = transport();
        t.set_original(silent(30.0));
        t.play_mode(PlayMode::Original, 2.0);
        clock.advance(150);
        t.stop();
        t.stop();

        assert!((t.position_sec() - 3.5).abs() < 1e-9);
        let stops = rx.try_iter().filter(|c| matches!(c, AudioCommand::StopVoices)).count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn seek_while_playing_restarts_same_mode() {
        let (mut t, clock, rx) = transport();
        t.set_original(silent(30.0));
        t.append_track(silent(30.0));
        t.play_mode(PlayMode::Recording, 0.0);
        clock.advance(100);
        let _ = rx.try_iter().count();

        assert_eq!(t.seek(12.0), 12.0);
        assert_eq!(t.playing_mode(), Some(PlayMode::Recording));
        assert!(matches!(rx.try_recv(), Ok(AudioCommand::Play { at_frame: 100, .. })));
        assert!((t.position_sec() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn released_tracks_are_freed_on_this_side() {
        let (mut t, _clock, rx) = transport();
        t.set_original(silent(1.0));
        t.append_track(silent(1.0));
        let weak = Arc::downgrade(t.tracks().original().unwrap());

        // stand-in for the renderer: hold what was registered until the release
        let mut registered: Vec<Arc<DecodedTrack>> = rx
            .try_iter()
            .filter_map(|c| match c {
                AudioCommand::RegisterTrack { track, .. } => Some(track),
                _ => None,
            })
            .collect();

        t.reset();
        assert!(rx.try_iter().any(|c| matches!(c, AudioCommand::ReleaseTracks)));
        assert_eq!(t.free_released(), 0);
        assert!(weak.upgrade().is_some());

        registered.clear();
        assert_eq!(t.free_released(), 2);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn newer_recording_releases_the_older_one() {
        let (mut t, _clock, rx) = transport();
        t.set_original(silent(1.0));
        let first = t.append_track(silent(1.0));
        let _ = rx.try_iter().count();

        t.append_track(silent(2.0));
        let released: Vec<TrackId> = rx
            .try_iter()
            .filter_map(|c| match c {
                AudioCommand::ReleaseTrack(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(released, vec![first]);
        assert_eq!(t.tracks().len(), 3);
        assert_eq!(t.duration_for_mode(PlayMode::Recording), 2.0);
    }

    #[test]
    fn original_is_set_once_until_reset() {
        let (mut t, _clock, rx) = transport();
        assert!(t.set_original(silent(1.0)).is_some());
        assert!(t.set_original(silent(2.0)).is_none());
        assert_eq!(t.tracks().len(), 1);

        t.reset();
        assert!(rx.try_iter().any(|c| matches!(c, AudioCommand::ReleaseTracks)));
        assert!(t.tracks().is_empty());
        assert!(t.set_original(silent(2.0)).is_some());
        assert_eq!(t.duration_sec(), 2.0);
    }
}
