use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use super::grid::draw_mode_grid;
use backtrack::live::TimingFeedback;
use backtrack::shared::EngineState;

const HELP: &str = "space play/pause  1-3 modes  m select  o play selected  p pause  \u{2190}/\u{2192} skip  \
                    r arm  s stop take  [ ] track vol  - = click vol  l live  , . target  q quit";

pub fn render(frame: &mut Frame, area: Rect, state: &EngineState, blink_on: bool) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // file, tempo, status
            Constraint::Length(3), // mode row
            Constraint::Length(3), // position
            Constraint::Length(5), // recording + live
            Constraint::Min(1),    // help
        ])
        .split(area);

    draw_screen(frame, sections[0], state, blink_on);
    let available = [state.track_count > 0, state.track_count > 1, state.track_count > 0];
    draw_mode_grid(frame, sections[1], state.selected_mode, state.playing_mode, &available);
    draw_position(frame, sections[2], state);
    draw_panels(frame, sections[3], state, blink_on);
    frame.render_widget(
        Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)),
        sections[4],
    );
}

fn clock(secs: f64) -> String {
    let secs = secs.max(0.0);
    format!("{}:{:05.2}", (secs / 60.0).floor() as u64, secs % 60.0)
}

fn draw_screen(frame: &mut Frame, area: Rect, state: &EngineState, blink_on: bool) {
    let file = state.file_name.as_deref().unwrap_or("(no file)");
    let tempo = match (state.bpm, state.processing) {
        (_, true) if blink_on => "detecting...".to_string(),
        (_, true) => String::new(),
        (Some(bpm), false) => format!("{} bpm", bpm),
        (None, false) => "-- bpm".to_string(),
    };
    let transport = if state.playing { "PLAYING" } else { "PAUSED" };

    let mut lines = vec![
        Line::from(vec![
            Span::styled(file, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("   "),
            Span::styled(tempo, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(format!(
            "{}   track vol {:.0}%   click vol {:.0}%{}",
            transport,
            state.track_volume * 100.0,
            state.metronome_volume * 100.0,
            if state.metronome_running { "   \u{266a}" } else { "" },
        )),
    ];
    if let Some(error) = &state.error {
        lines.push(Line::styled(error.as_str(), Style::default().fg(Color::Red)));
    }

    let block = Block::default().borders(Borders::ALL).title(" backtrack ");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_position(frame: &mut Frame, area: Rect, state: &EngineState) {
    let ratio = if state.duration_sec > 0.0 {
        (state.position_sec / state.duration_sec).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(ratio)
        .label(format!("{} / {}", clock(state.position_sec), clock(state.duration_sec)));
    frame.render_widget(gauge, area);
}

fn draw_panels(frame: &mut Frame, area: Rect, state: &EngineState, blink_on: bool) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    // recording
    let rec_status = if state.recording {
        Span::styled(
            if blink_on { "\u{25cf} REC" } else { "  REC" },
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else if state.armed {
        Span::styled("armed", Style::default().fg(Color::Yellow))
    } else {
        Span::raw("off")
    };
    let mut rec_lines = vec![Line::from(vec![Span::raw("record: "), rec_status])];
    if let Some(info) = &state.last_take {
        let mp3 = if info.take.mp3.is_some() { " + mp3" } else { "" };
        rec_lines.push(Line::from(format!(
            "last take {:.1}s from {} wav{}",
            info.take.duration_secs(),
            clock(info.offset_secs),
            mp3
        )));
        if let Some(saved) = &info.saved {
            let name = saved.wav.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            rec_lines.push(Line::from(format!("saved {}", name)));
        }
    }
    frame.render_widget(
        Paragraph::new(rec_lines).block(Block::default().borders(Borders::ALL).title(" take ")),
        cols[0],
    );

    // live analyzer
    let live = &state.live;
    let live_lines = if state.live_running {
        let color = match live.feedback {
            TimingFeedback::OnTime => Color::Green,
            TimingFeedback::Rushing | TimingFeedback::Dragging => Color::Yellow,
            TimingFeedback::Unknown => Color::DarkGray,
        };
        let bpm = live.current_bpm.map(|b| format!("{:.0}", b)).unwrap_or_else(|| "--".into());
        vec![
            Line::from(format!("you {} / target {:.0} bpm   hits {}", bpm, state.live_target_bpm, live.hit_count)),
            Line::from(vec![
                Span::styled(live.feedback.label(), Style::default().fg(color)),
                Span::raw(format!("   accuracy {:.0}%", live.accuracy)),
            ]),
        ]
    } else {
        vec![Line::from("off (l to start)")]
    };
    frame.render_widget(
        Paragraph::new(live_lines).block(Block::default().borders(Borders::ALL).title(" live ")),
        cols[1],
    );
}
