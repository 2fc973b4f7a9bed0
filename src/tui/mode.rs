use backtrack::shared::{EngineState, PlayMode};

// state local to the tui that key resolution depends on,
// synced from EngineState once per loop
#[derive(Clone, Debug, Default)]
pub struct TuiState {
    pub selected_mode: PlayMode,
}

impl TuiState {
    pub fn sync(&mut self, state: &EngineState) {
        self.selected_mode = state.selected_mode;
    }
}
