mod export;
mod help;
mod state;

use crate::cli::Cli;
use crate::model::{format_bytes, ChannelStatus, UploadState, STATUS_PROCESSING};
use crate::orchestrator::{self, Controller, UiCommand, UiUpdate};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use export::{copy_to_clipboard, save_and_show_path};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState, TAB_COUNT, TAB_DASHBOARD, TAB_HELP, TAB_NOTIFICATIONS};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure between the controller and the UI thread.
    let (update_tx, update_rx) = mpsc::unbounded_channel::<UiUpdate>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // Bad addresses fail here, before the terminal is taken over.
    let controller = Controller::new(crate::cli::build_config(&args), update_tx)?;

    if let Some(file) = args.file.clone() {
        let _ = cmd_tx.send(UiCommand::SelectFile(file));
        if args.upload_on_launch {
            let _ = cmd_tx.send(UiCommand::Submit);
        }
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, update_rx, cmd_tx));

    let res = controller.run(cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    let session = res?;
    let processed = orchestrator::process_session_completion(args.export_json.as_deref(), &session);
    for msg in processed.export_messages {
        eprintln!("{msg}");
    }
    Ok(())
}

/// What a key press asks the UI loop to do.
#[derive(Debug)]
enum Action {
    None,
    Send(UiCommand),
    Quit,
    CopyResult,
    SaveSnapshot,
}

fn handle_key(state: &mut UiState, modifiers: KeyModifiers, code: KeyCode) -> Action {
    if modifiers == KeyModifiers::CONTROL && code == KeyCode::Char('c') {
        return Action::Quit;
    }

    if state.editing_path {
        match code {
            KeyCode::Enter => {
                return match state.finish_path_edit() {
                    Some(path) => Action::Send(UiCommand::SelectFile(path)),
                    None => {
                        state.set_info("No path entered", false);
                        Action::None
                    }
                };
            }
            KeyCode::Esc => state.editing_path = false,
            KeyCode::Backspace => {
                state.path_input.pop();
            }
            KeyCode::Char(c) => state.path_input.push(c),
            _ => {}
        }
        return Action::None;
    }

    match code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Char('o') => {
            state.tab = TAB_DASHBOARD;
            state.start_path_edit();
            Action::None
        }
        KeyCode::Char('u') => Action::Send(UiCommand::Submit),
        KeyCode::Char('r') => {
            state.set_info("Reconnecting notification channel…", false);
            Action::Send(UiCommand::Reconnect)
        }
        KeyCode::Char('d') => Action::Send(UiCommand::Disconnect),
        KeyCode::Char('y') => Action::CopyResult,
        KeyCode::Char('s') => Action::SaveSnapshot,
        KeyCode::Tab => {
            state.tab = (state.tab + 1) % TAB_COUNT;
            Action::None
        }
        KeyCode::Char('?') => {
            state.tab = TAB_HELP;
            Action::None
        }
        KeyCode::Up | KeyCode::Char('k') if state.tab == TAB_NOTIFICATIONS => {
            if state.log_scroll + 1 < state.session.log.len() {
                state.log_scroll += 1;
            }
            Action::None
        }
        KeyCode::Down | KeyCode::Char('j') if state.tab == TAB_NOTIFICATIONS => {
            state.log_scroll = state.log_scroll.saturating_sub(1);
            Action::None
        }
        _ => Action::None,
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    mut update_rx: UnboundedReceiver<UiUpdate>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        service: args.base_url.clone(),
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain updates without blocking to keep the UI responsive.
        let mut controller_gone = false;
        loop {
            match update_rx.try_recv() {
                Ok(update) => state.apply_update(update),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        if controller_gone {
            break Ok(());
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
                match handle_key(&mut state, k.modifiers, k.code) {
                    Action::None => {}
                    Action::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    Action::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    Action::CopyResult => match state.session.result_locator.clone() {
                        Some(url) => match copy_to_clipboard(&url) {
                            Ok(()) => state.set_info(format!("✓ Copied to clipboard: {url}"), false),
                            Err(e) => state.set_info(format!("Clipboard copy failed: {e:#}"), true),
                        },
                        None => state.set_info("No enhanced video to copy yet", false),
                    },
                    Action::SaveSnapshot => save_and_show_path(&mut state),
                }
                // Redraw right away so typed characters show up without waiting for the tick.
                terminal.draw(|f| draw(f.area(), f, &state)).ok();
                last_tick = Instant::now();
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Dashboard"),
        Line::from(format!("Notifications ({})", state.session.log.len())),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("vproc - {}", state.service)),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_DASHBOARD => draw_dashboard(chunks[1], f, state),
        TAB_NOTIFICATIONS => draw_notifications(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // File
                Constraint::Length(3), // Upload gauge
                Constraint::Length(4), // Status + channel
                Constraint::Min(6),    // Metadata | Enhanced video
                Constraint::Length(3), // Info line
            ]
            .as_ref(),
        )
        .split(area);

    draw_file(main[0], f, state);
    draw_upload(main[1], f, state);
    draw_status(main[2], f, state);

    let results = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(main[3]);
    draw_metadata(results[0], f, state);
    draw_result(results[1], f, state);

    let info_style = if state.info_is_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    let info = Paragraph::new(Span::styled(state.info.clone(), info_style))
        .block(Block::default().borders(Borders::ALL).title("Info"));
    f.render_widget(info, main[4]);
}

fn draw_file(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let p = if state.editing_path {
        Paragraph::new(Line::from(vec![
            Span::raw(state.path_input.clone()),
            Span::styled("█", Style::default().fg(Color::Yellow)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title("File path (Enter to select, Esc to cancel)"),
        )
    } else {
        let line = match state.session.selected_file.as_ref() {
            Some(file) => Line::from(vec![
                Span::styled(file.name.clone(), Style::default().fg(Color::Cyan)),
                Span::raw(format!("  ({})", format_bytes(file.size_bytes))),
            ]),
            None => Line::from(Span::styled(
                "No file selected (press o)",
                Style::default().fg(Color::Gray),
            )),
        };
        let title = if state.session.upload_in_flight() {
            "File (uploading)"
        } else {
            "File"
        };
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title(title))
    };
    f.render_widget(p, area);
}

fn draw_upload(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (ratio, label, color) = match &state.session.upload {
        UploadState::Idle => (0.0, "Not submitted (press u)".to_string(), Color::Gray),
        UploadState::Uploading {
            bytes_sent,
            total_bytes,
        } => {
            let ratio = if *total_bytes == 0 {
                0.0
            } else {
                (*bytes_sent as f64 / *total_bytes as f64).clamp(0.0, 1.0)
            };
            (
                ratio,
                format!("{} / {}", format_bytes(*bytes_sent), format_bytes(*total_bytes)),
                Color::Cyan,
            )
        }
        UploadState::Accepted { filename, .. } => {
            (1.0, format!("Accepted as {filename}"), Color::Green)
        }
        UploadState::Failed { error } => (0.0, format!("Failed: {error}"), Color::Red),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Upload"))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let status = if state.session.status.is_empty() {
        "-".to_string()
    } else {
        state.session.status.clone()
    };
    let status_color = if state.session.enhanced() {
        Color::Green
    } else if state.session.status == STATUS_PROCESSING {
        Color::Yellow
    } else {
        Color::White
    };
    let channel_color = match state.session.channel {
        ChannelStatus::Connected => Color::Green,
        ChannelStatus::Connecting => Color::Yellow,
        ChannelStatus::Degraded { .. } => Color::Magenta,
        ChannelStatus::Disconnected => Color::Red,
    };
    let p = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::styled(
                status,
                Style::default()
                    .fg(status_color)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("Channel: ", Style::default().fg(Color::Gray)),
            Span::styled(
                state.session.channel.label(),
                Style::default().fg(channel_color),
            ),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(p, area);
}

fn draw_metadata(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = Vec::new();
    match state.session.metadata.as_ref() {
        Some(m) => {
            push_wrapped_status_kv(&mut lines, "Resolution", &m.resolution, area.width);
            push_wrapped_status_kv(&mut lines, "FPS", &m.fps.to_string(), area.width);
            push_wrapped_status_kv(
                &mut lines,
                "Duration",
                &format!("{} s", m.duration),
                area.width,
            );
        }
        None => lines.push(Line::from(Span::styled(
            waiting_text(state, "metadata"),
            Style::default().fg(Color::Gray),
        ))),
    }
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Metadata"));
    f.render_widget(p, area);
}

fn draw_result(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = Vec::new();
    match state.session.result_locator.as_deref() {
        Some(url) => {
            push_wrapped_status_kv(&mut lines, "URL", url, area.width);
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "press y to copy",
                Style::default().fg(Color::Gray),
            )));
        }
        None => lines.push(Line::from(Span::styled(
            waiting_text(state, "the enhanced video"),
            Style::default().fg(Color::Gray),
        ))),
    }
    if let Some(path) = state.last_saved_path.as_ref() {
        lines.push(Line::from(""));
        push_wrapped_status_kv(
            &mut lines,
            "Last snapshot",
            &path.display().to_string(),
            area.width,
        );
    }
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Enhanced video"));
    f.render_widget(p, area);
}

fn waiting_text(state: &UiState, what: &str) -> String {
    match state.session.upload {
        UploadState::Accepted { .. } => format!("Waiting for {what}..."),
        _ => "-".to_string(),
    }
}

fn draw_notifications(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let log = &state.session.log;
    let lines: Vec<Line> = if log.is_empty() {
        vec![Line::from(Span::styled(
            "No notifications received yet.",
            Style::default().fg(Color::Gray),
        ))]
    } else {
        // Newest first.
        log.iter()
            .rev()
            .skip(state.log_scroll)
            .map(|entry| {
                let (tag, color) = if entry.applied {
                    ("applied", Color::Green)
                } else {
                    ("ignored", Color::Gray)
                };
                Line::from(vec![
                    Span::styled(entry.at.clone(), Style::default().fg(Color::Gray)),
                    Span::raw("  "),
                    Span::styled(format!("{:<9}", tag), Style::default().fg(color)),
                    Span::raw(entry.status.clone()),
                ])
            })
            .collect()
    };
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(p, area);
}
