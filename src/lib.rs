pub mod audio;
pub mod audio_api;
pub mod capture;
pub mod config;
pub mod error;
pub mod live;
pub mod metronome;
pub mod practice;
pub mod shared;
pub mod tempo;
pub mod transport;

pub use error::{EngineError, EngineResult};
pub use practice::PracticeEngine;
