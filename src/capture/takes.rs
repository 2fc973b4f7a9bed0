use std::path::{Path, PathBuf};

use super::Take;
use crate::error::EngineResult;

#[derive(Clone, Debug, PartialEq)]
pub struct SavedTake {
    pub wav: PathBuf,
    pub mp3: Option<PathBuf>,
}

// take-001, take-002, ... picking up after the highest number already there
fn next_take_number(dir: &Path) -> EngineResult<u32> {
    let mut highest = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let number = name
            .strip_prefix("take-")
            .and_then(|rest| rest.split('.').next())
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = number {
            highest = highest.max(n);
        }
    }
    Ok(highest + 1)
}

pub fn save_take(dir: &Path, take: &Take) -> EngineResult<SavedTake> {
    std::fs::create_dir_all(dir)?;
    let stem = format!("take-{:03}", next_take_number(dir)?);

    let wav = dir.join(format!("{}.wav", stem));
    std::fs::write(&wav, &take.wav)?;

    let mp3 = match &take.mp3 {
        Some(bytes) => {
            let path = dir.join(format!("{}.mp3", stem));
            std::fs::write(&path, bytes)?;
            Some(path)
        }
        None => None,
    };

    log::info!("saved {} ({:.2}s)", wav.display(), take.duration_secs());
    Ok(SavedTake { wav, mp3 })
}
