use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
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

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        key_line("o", 11, "Choose a video file (type a path)"),
        key_line("u", 11, "Upload the selected file"),
        key_line("r", 11, "Reconnect the notification channel"),
        key_line("d", 11, "Disconnect the notification channel"),
        key_line("y", 11, "Copy the enhanced video URL"),
        key_line("s", 11, "Save session snapshot as JSON"),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("While typing a path:"),
        key_line("Enter", 7, "Select the file"),
        key_line("Esc", 9, "Cancel"),
        Line::from(""),
        Line::from("Notifications tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Scroll"),
        ]),
        Line::from(""),
        Line::from("Status values come from the service; 'Processing...' means the"),
        Line::from("upload was accepted and results have not been published yet."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
