mod tui;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::terminal;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use backtrack::audio::{self, CpalMicrophone};
use backtrack::config::{self, BACKTRACK_DIR, EngineConfig};
use backtrack::practice::PracticeEngine;
use backtrack::shared::InputEvent;

const LOG_FILE: &str = "backtrack.log";
const TAKES_DIR: &str = "takes";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// the terminal belongs to the ui, so logs go to <project>/.backtrack/backtrack.log
fn init_logging(project_dir: &Path) -> anyhow::Result<()> {
    let dir = project_dir.join(BACKTRACK_DIR);
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .with_context(|| format!("opening log file in {}", dir.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn run() -> anyhow::Result<()> {
    // backtrack [audio file] [project dir]
    let mut args = std::env::args().skip(1);
    let audio_file = args.next().map(PathBuf::from);
    let project_dir: PathBuf = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    init_logging(&project_dir)?;
    log::info!("backtrack starting in {}", project_dir.display());

    let config = match config::load_config(&project_dir) {
        Some(config) => config,
        None => {
            let config = EngineConfig::default();
            if let Err(e) = config::save_config(&project_dir, &config) {
                log::warn!("could not write default config: {}", e);
            }
            config
        }
    };

    let audio = audio::start_audio(&config)?;
    let mut engine = PracticeEngine::new(audio.commands(), audio.clock(), Rc::new(CpalMicrophone), config)
        .with_take_dir(project_dir.join(TAKES_DIR));
    if let Some(path) = &audio_file {
        engine
            .load_path(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }

    terminal::enable_raw_mode()?;
    let _guard = RawModeGuard; // auto drops when out of scope
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;

    let tick_rate = Duration::from_millis(25); // housekeeping cadence
    let blink_start = Instant::now();
    let mut tui_state = tui::mode::TuiState::default();

    loop {
        let blink_on = (blink_start.elapsed().as_millis() / 250) % 2 == 0;
        engine.tick();
        tui_state.sync(engine.state());

        term.draw(|frame| {
            tui::view::render(frame, frame.area(), engine.state(), blink_on);
        })?;

        for event in tui::input::poll_input(tick_rate, &tui_state)? {
            if event == InputEvent::Quit {
                engine.shutdown();
                drop(term);
                drop(audio);
                log::info!("bye");
                return Ok(());
            }
            engine.handle_input(event);
        }
    }
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(std::io::stdout(), terminal::Clear(terminal::ClearType::All));
        let _ = terminal::disable_raw_mode();
    }
}
