use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};

pub use crate::audio::{DecodedTrack, TrackId};

#[derive(Clone, Debug)]
pub struct VoiceStart {
    pub track: TrackId,
    pub offset_secs: f64,
}

#[derive(Clone, Debug)]
pub enum AudioCommand {
    // The renderer never decodes or allocates track data. Tracks are decoded
    // on the control side and registered here before anything plays them.
    // The control side keeps its own Arc until the renderer has let go, so
    // track memory is never freed on the audio thread.
    RegisterTrack { id: TrackId, track: Arc<DecodedTrack> },
    ReleaseTrack(TrackId),
    ReleaseTracks,

    // Every voice in one Play starts on the same output frame. Any voices
    // already playing are dropped first.
    Play { voices: Vec<VoiceStart>, at_frame: u64 },
    StopVoices,

    // metronome
    ScheduleClick { at_frame: u64 },
    CancelClicks, // clicks already sounding are left alone

    SetTrackGain(f32),
    SetClickGain(f32),
}

// Control-side end of the command queue. The queue is bounded and the audio
// thread drains it every block, so a full queue means the stream is stalled;
// commands are dropped rather than blocking the caller.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<AudioCommand>,
}

impl CommandSender {
    pub fn new(tx: Sender<AudioCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, cmd: AudioCommand) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("audio command queue full, dropping command"),
            Err(TrySendError::Disconnected(_)) => log::debug!("audio stream gone, dropping command"),
        }
    }
}
