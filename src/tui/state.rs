use crate::orchestrator::session::Session;
use crate::orchestrator::UiUpdate;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::path::PathBuf;

pub const TAB_DASHBOARD: usize = 0;
pub const TAB_NOTIFICATIONS: usize = 1;
pub const TAB_HELP: usize = 2;
pub const TAB_COUNT: usize = 3;

#[derive(Default)]
pub struct UiState {
    pub tab: usize,
    /// Base URL shown in the title bar.
    pub service: String,
    /// Latest snapshot published by the controller.
    pub session: Session,
    pub info: String,
    pub info_is_error: bool,
    // File path input
    pub editing_path: bool,
    pub path_input: String,
    pub last_saved_path: Option<PathBuf>,
    /// Rows scrolled back from the newest notification.
    pub log_scroll: usize,
}

impl UiState {
    pub fn apply_update(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Session(session) => {
                self.session = *session;
                self.log_scroll = self
                    .log_scroll
                    .min(self.session.log.len().saturating_sub(1));
            }
            UiUpdate::Info(info) => {
                self.info = info.to_message();
                self.info_is_error = info.is_error();
            }
        }
    }

    /// Local message that did not come from the controller.
    pub fn set_info(&mut self, msg: impl Into<String>, is_error: bool) {
        self.info = msg.into();
        self.info_is_error = is_error;
    }

    pub fn start_path_edit(&mut self) {
        self.path_input = self
            .session
            .selected_file
            .as_ref()
            .map(|f| f.path.display().to_string())
            .unwrap_or_default();
        self.editing_path = true;
    }

    /// Leave edit mode and return the path to select, if anything was typed.
    pub fn finish_path_edit(&mut self) -> Option<PathBuf> {
        self.editing_path = false;
        let trimmed = self.path_input.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Push `label: value`, wrapping the value onto indented continuation lines
/// so it fits inside a bordered block `area_width` columns wide.
pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Borders plus one column of padding on each side.
    let inner = usize::from(area_width).saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let first_width = inner.saturating_sub(label_text.chars().count() + 1).max(1);
    let rest_width = inner.saturating_sub(2).max(1);

    let chars: Vec<char> = value.chars().collect();
    let (head, mut tail) = chars.split_at(chars.len().min(first_width));
    out.push(Line::from(vec![
        Span::styled(label_text, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::raw(head.iter().collect::<String>()),
    ]));

    while !tail.is_empty() {
        let (line, rest) = tail.split_at(tail.len().min(rest_width));
        out.push(Line::from(vec![
            Span::raw("  "),
            Span::raw(line.iter().collect::<String>()),
        ]));
        tail = rest;
    }
}
