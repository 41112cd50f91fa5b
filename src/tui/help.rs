use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

/// Help overlay, centered over `area`.
pub fn draw_help(area: Rect, f: &mut Frame) {
    let popup = centered(area, 60, 26);
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        key_line("tab", 9, "Next tab (shift-tab: previous)"),
        key_line("1 2 3", 7, "Dashboard / Settings / Manual clean"),
        key_line("?", 11, "Toggle this help"),
        Line::from(""),
        Line::from("Dashboard:"),
        key_line("r", 11, "Refresh status"),
        Line::from(""),
        Line::from("Settings:"),
        key_line("↑/↓", 9, "Select field"),
        key_line("enter", 7, "Edit text / flip toggle"),
        key_line("s", 11, "Save configuration"),
        key_line("u", 11, "Undo unsaved edits"),
        Line::from(""),
        Line::from("Manual clean:"),
        key_line("s", 11, "Scan images"),
        key_line("space", 7, "Toggle image"),
        key_line("a", 11, "Toggle all"),
        key_line("d", 11, "Delete selected (dry run per policy)"),
        key_line("y / n", 7, "Confirm / abort deletion"),
        key_line("c", 11, "Cancel running scan or cleanup"),
        key_line("e", 11, "Export last cycle as JSON"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, popup);
    f.render_widget(p, popup);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((area.height - h) / 2),
            Constraint::Length(h),
            Constraint::Min(0),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length((area.width - w) / 2),
            Constraint::Length(w),
            Constraint::Min(0),
        ])
        .split(vertical[1])[1]
}
