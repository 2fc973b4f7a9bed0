use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Paragraph};

use backtrack::shared::PlayMode;

// one cell per play mode: lit while that mode is playing,
// outlined when it's only selected
pub fn draw_mode_grid(
    frame: &mut Frame,
    area: Rect,
    selected: PlayMode,
    playing: Option<PlayMode>,
    available: &[bool; 3],
) {
    let col_constraints = [Constraint::Ratio(1, 3); 3];
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(col_constraints)
        .split(area);

    for (idx, (mode, cell_area)) in PlayMode::ALL.iter().zip(cols.iter()).enumerate() {
        let style = if playing == Some(*mode) {
            Style::default().fg(Color::LightMagenta).bg(Color::Magenta).add_modifier(Modifier::BOLD)
        } else if !available[idx] {
            Style::default().fg(Color::DarkGray)
        } else if selected == *mode {
            Style::default().fg(Color::LightMagenta)
        } else {
            Style::default().fg(Color::Gray)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(style)
            .style(style);
        let label = Paragraph::new(format!("{} {}", idx + 1, mode.label()))
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(label, *cell_area);
    }
}
