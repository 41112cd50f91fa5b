mod export;
mod help;
mod settings;
mod state;

use crate::config::{ConfigSource, JanitorConfig};
use crate::engine::Reachability;
use crate::metrics::{format_bytes, CatalogMetrics};
use crate::model::{CyclePhase, CycleResult};
use crate::orchestrator::{self, Orchestrator, SessionEvent, UiCommand};
use crate::service::ServiceState;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs, Wrap},
    Terminal,
};
use settings::Field;
use state::{Activity, SessionState, Tab};
use std::{io, time::Duration, time::Instant};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(orch: Orchestrator, source: ConfigSource, cfg: JanitorConfig) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_cfg, event_rx, cmd_tx));

    let res = orchestrator::run_controller(orch, source, cfg, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    cfg: JanitorConfig,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = SessionState::new(cfg);
    if state.dry_run() {
        state.info = "Dry run: deletions are simulated".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key(&mut state, k) {
                    KeyAction::None => {}
                    KeyAction::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

#[derive(Debug)]
enum KeyAction {
    None,
    Send(UiCommand),
    Quit,
}

impl From<Option<UiCommand>> for KeyAction {
    fn from(cmd: Option<UiCommand>) -> Self {
        cmd.map_or(KeyAction::None, KeyAction::Send)
    }
}

fn handle_key(state: &mut SessionState, k: KeyEvent) -> KeyAction {
    if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
        return KeyAction::Quit;
    }
    if state.show_help {
        if matches!(k.code, KeyCode::Char('?') | KeyCode::Char('q') | KeyCode::Esc) {
            state.show_help = false;
        }
        return KeyAction::None;
    }
    // Text entry swallows every key until the field is closed.
    if state.tab == Tab::Settings && state.settings.editing {
        match k.code {
            KeyCode::Enter | KeyCode::Esc => state.settings.activate(),
            KeyCode::Backspace => state.settings.backspace(),
            KeyCode::Char(c) => state.settings.input(c),
            _ => {}
        }
        return KeyAction::None;
    }

    match k.code {
        KeyCode::Char('q') => return KeyAction::Quit,
        KeyCode::Tab => state.tab = state.tab.next(),
        KeyCode::BackTab => state.tab = state.tab.prev(),
        KeyCode::Char('1') => state.tab = Tab::Dashboard,
        KeyCode::Char('2') => state.tab = Tab::Settings,
        KeyCode::Char('3') => state.tab = Tab::ManualClean,
        KeyCode::Char('?') => state.show_help = true,
        _ => {
            return match state.tab {
                Tab::Dashboard => dashboard_key(state, k.code),
                Tab::Settings => settings_key(state, k.code),
                Tab::ManualClean => manual_clean_key(state, k.code),
            }
        }
    }
    KeyAction::None
}

fn dashboard_key(state: &mut SessionState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('r') => {
            state.info = "Refreshing status…".into();
            KeyAction::Send(UiCommand::RefreshStatus)
        }
        _ => KeyAction::None,
    }
}

fn settings_key(state: &mut SessionState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Up | KeyCode::Char('k') => state.settings.select_prev(),
        KeyCode::Down | KeyCode::Char('j') => state.settings.select_next(),
        KeyCode::Enter => state.settings.activate(),
        KeyCode::Char('u') => {
            state.settings = settings::SettingsDraft::from_config(&state.config);
            state.info = "Unsaved edits discarded".into();
        }
        KeyCode::Char('s') => match state.settings.apply_to(&state.config) {
            Ok(cfg) => {
                state.info = "Saving…".into();
                return KeyAction::Send(UiCommand::SaveConfig(Box::new(cfg)));
            }
            Err(e) => state.info = format!("Not saved: {e}"),
        },
        _ => {}
    }
    KeyAction::None
}

fn manual_clean_key(state: &mut SessionState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('s') => state.request_scan().into(),
        KeyCode::Up | KeyCode::Char('k') => {
            state.move_cursor(-1);
            KeyAction::None
        }
        KeyCode::Down | KeyCode::Char('j') => {
            state.move_cursor(1);
            KeyAction::None
        }
        KeyCode::Char(' ') => {
            state.toggle_current();
            KeyAction::None
        }
        KeyCode::Char('a') => {
            state.toggle_all();
            KeyAction::None
        }
        KeyCode::Char('d') => state.request_clean().into(),
        KeyCode::Char('y') => state.confirm().into(),
        KeyCode::Char('n') => {
            state.abort_confirm();
            KeyAction::None
        }
        KeyCode::Char('c') if state.in_progress.is_some() => KeyAction::Send(UiCommand::Cancel),
        KeyCode::Char('e') => {
            match state.last_cycle.as_ref() {
                Some(r) => match export::export_cycle_json(r) {
                    Ok(p) => state.info = format!("Exported JSON: {}", p.display()),
                    Err(e) => state.info = format!("JSON export failed: {e:#}"),
                },
                None => state.info = "No completed cycle to export yet.".into(),
            }
            KeyAction::None
        }
        _ => KeyAction::None,
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &SessionState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let title = if state.dry_run() {
        "docker-janitor [DRY RUN]"
    } else {
        "docker-janitor"
    };
    let tabs = Tabs::new(Tab::ALL.iter().map(|t| Line::from(t.title())).collect::<Vec<_>>())
        .select(state.tab.index())
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        Tab::Dashboard => draw_dashboard(chunks[1], f, state),
        Tab::Settings => draw_settings(chunks[1], f, state),
        Tab::ManualClean => draw_manual_clean(chunks[1], f, state),
    }
    draw_status_line(chunks[2], f, state);

    if state.show_help {
        help::draw_help(area, f);
    }
}

fn kv(key: &str, value: impl Into<String>, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{key:<14}"), Style::default().fg(Color::Gray)),
        Span::styled(value.into(), Style::default().fg(color)),
    ])
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &SessionState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(0)].as_ref())
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(main[0]);

    let mut status_lines = Vec::new();
    match &state.status {
        None => status_lines.push(Line::from("Checking…")),
        Some(s) => {
            let (engine, color) = match &s.engine {
                Reachability::Reachable => ("reachable".to_string(), Color::Green),
                Reachability::Unreachable(why) => (format!("unreachable: {why}"), Color::Red),
            };
            status_lines.push(kv("Engine", engine, color));
            let service_color = match s.service {
                ServiceState::Active => Color::Green,
                ServiceState::Failed => Color::Red,
                _ => Color::Yellow,
            };
            status_lines.push(kv(
                "Service",
                format!("{} ({})", s.service.label(), s.service_unit),
                service_color,
            ));
            status_lines.push(kv(
                "Interval",
                humantime::format_duration(s.interval).to_string(),
                Color::White,
            ));
            let backups = if !s.backup_enabled {
                ("disabled".to_string(), Color::Yellow)
            } else {
                match &s.backup {
                    Ok(b) => (
                        format!("{} entries, {} pending", b.entries, b.pending),
                        Color::White,
                    ),
                    Err(e) => (format!("unreadable: {e}"), Color::Red),
                }
            };
            status_lines.push(kv("Backups", backups.0, backups.1));
            status_lines.push(kv(
                "Mode",
                if s.dry_run { "dry run" } else { "live" },
                if s.dry_run { Color::Yellow } else { Color::White },
            ));
            status_lines.push(kv("Checked", clock(s.checked_at), Color::DarkGray));
        }
    }
    f.render_widget(
        Paragraph::new(status_lines).block(Block::default().borders(Borders::ALL).title("Status")),
        top[0],
    );

    let mut cycle_lines = Vec::new();
    if let Some(scan) = &state.last_scan {
        let m = CatalogMetrics::from_report(scan);
        cycle_lines.push(kv(
            "Images",
            format!("{} ({}), {} untagged", m.images, format_bytes(m.total_bytes), m.untagged),
            Color::White,
        ));
        cycle_lines.push(kv(
            "Eligible",
            format!("{} ({})", m.eligible, format_bytes(m.eligible_bytes)),
            Color::White,
        ));
    }
    match &state.last_cycle {
        Some(r) => cycle_lines.extend(cycle_summary(r)),
        None if state.last_scan.is_none() => {
            cycle_lines.push(Line::from("No scan or cycle yet. Scan from the Manual clean tab."))
        }
        None => {}
    }
    f.render_widget(
        Paragraph::new(cycle_lines)
            .block(Block::default().borders(Borders::ALL).title("Last cycle")),
        top[1],
    );

    let log_lines: Vec<Line> = state
        .status
        .as_ref()
        .map(|s| s.log_tail.iter().map(|l| Line::from(l.clone())).collect())
        .unwrap_or_default();
    f.render_widget(
        Paragraph::new(log_lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Recent log")),
        main[1],
    );
}

fn cycle_summary(r: &CycleResult) -> Vec<Line<'static>> {
    let mut lines = vec![kv(
        "Finished",
        format!("{} ({:?})", clock(r.finished_at), r.status).to_lowercase(),
        if r.is_failed() { Color::Red } else { Color::White },
    )];
    if let Some(err) = &r.error {
        lines.push(kv("Error", err.clone(), Color::Red));
    }
    if r.dry_run {
        lines.push(kv(
            "Would delete",
            format!("{} ({})", r.simulated, format_bytes(r.simulated_bytes)),
            Color::Yellow,
        ));
    } else {
        lines.push(kv(
            "Deleted",
            format!("{} ({})", r.deleted, format_bytes(r.reclaimed_bytes)),
            Color::Green,
        ));
    }
    lines.push(kv(
        "Kept/failed",
        format!("{} / {} (skipped {})", r.kept, r.failed, r.skipped),
        if r.failed > 0 { Color::Red } else { Color::White },
    ));
    lines
}

fn draw_settings(area: Rect, f: &mut ratatui::Frame, state: &SessionState) {
    let d = &state.settings;
    let items: Vec<ListItem> = Field::ALL
        .iter()
        .map(|field| {
            let mut value = d.value(*field);
            if d.editing && *field == d.field() {
                value.push('_');
            }
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<22}", field.label()), Style::default().fg(Color::Gray)),
                Span::raw(value),
            ]))
        })
        .collect();
    let title = if d.dirty { "Settings (unsaved)" } else { "Settings" };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut list_state = ListState::default();
    list_state.select(Some(d.selected));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_manual_clean(area: Rect, f: &mut ratatui::Frame, state: &SessionState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let now = OffsetDateTime::now_utc();
    let eligible = state.eligible();
    let items: Vec<ListItem> = eligible
        .iter()
        .map(|e| {
            let mark = if state.selection.contains(&e.record.id) {
                "[x]"
            } else {
                "[ ]"
            };
            let age = (now - e.record.created_at).whole_days();
            ListItem::new(Line::from(vec![
                Span::styled(format!("{mark} "), Style::default().fg(Color::Cyan)),
                Span::raw(format!("{:<13}", e.record.short_id())),
                Span::raw(format!("{:>10}  ", format_bytes(e.record.size_bytes))),
                Span::styled(format!("{age:>4}d  "), Style::default().fg(Color::Gray)),
                Span::raw(e.record.display_tags()),
            ]))
        })
        .collect();

    let title = match &state.last_scan {
        None => "Eligible images (press s to scan)".to_string(),
        Some(scan) => format!(
            "Eligible images: {} of {} (scanned {})",
            eligible.len(),
            scan.entries.len(),
            clock(scan.scanned_at)
        ),
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default();
    if !eligible.is_empty() {
        list_state.select(Some(state.cursor));
    }
    f.render_stateful_widget(list, chunks[0], &mut list_state);

    let footer = if state.confirm_pending {
        Line::from(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ))
    } else {
        Line::from(format!(
            "Selected: {} ({})   s scan  space toggle  a all  d delete  e export",
            state.selection.len(),
            format_bytes(state.selected_bytes())
        ))
    };
    f.render_widget(
        Paragraph::new(footer).block(Block::default().borders(Borders::ALL)),
        chunks[1],
    );
}

fn draw_status_line(area: Rect, f: &mut ratatui::Frame, state: &SessionState) {
    let activity = match state.in_progress {
        Some(Activity::Scanning) => Span::styled("scanning ", Style::default().fg(Color::Yellow)),
        Some(Activity::Cleaning) => Span::styled(
            format!("{} ({} done) ", state.phase.label(), state.processed),
            Style::default().fg(Color::Yellow),
        ),
        None if state.phase == CyclePhase::Done => {
            Span::styled("done ", Style::default().fg(Color::Green))
        }
        None => Span::styled("idle ", Style::default().fg(Color::DarkGray)),
    };
    let line = Line::from(vec![
        activity,
        Span::raw("│ "),
        Span::raw(state.info.clone()),
        Span::styled("   ? help  q quit", Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn clock(t: OffsetDateTime) -> String {
    let t = match time::UtcOffset::current_local_offset() {
        Ok(off) => t.to_offset(off),
        Err(_) => t,
    };
    format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
}
