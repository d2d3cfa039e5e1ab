// Live observer panel
// Renders the bounded packet log with filtering and a hex detail pane

use std::io::{self, stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use parking_lot::Mutex;
use ratatui::{prelude::*, widgets::*};

use hidscope_capture::{Envelope, EventData, PacketLog, MAX_PACKETS};

use crate::filter::{Category, LogFilter};
use crate::format::{pretty_time, to_hex_string};
use crate::printer::summarize;

/// Application state
struct App {
    log: Arc<Mutex<PacketLog>>,
    filter: LogFilter,
    title: String,
    show_hex: bool,
    selected: usize,
    visible: Vec<Envelope>,
    paused: bool,
    filter_editing: bool,
    filter_edit_text: String,
    status_msg: String,
    show_help: bool,
}

/// A single keybinding definition
struct Keybind {
    keys: &'static str,
    description: &'static str,
}

/// All panel keybindings
const PANEL_KEYBINDS: &[Keybind] = &[
    Keybind { keys: "q / Esc", description: "Quit" },
    Keybind { keys: "? / F1", description: "Toggle this help" },
    Keybind { keys: "↑ / k", description: "Select older packet" },
    Keybind { keys: "↓ / j", description: "Select newer packet" },
    Keybind { keys: "PgUp/PgDn", description: "Fast scroll (15 rows)" },
    Keybind { keys: "Home", description: "Jump to newest" },
    Keybind { keys: "/", description: "Edit text filter" },
    Keybind { keys: "1-4", description: "Toggle reports/features/lifecycle/discovery" },
    Keybind { keys: "x", description: "Toggle hex detail" },
    Keybind { keys: "Space", description: "Pause/resume" },
    Keybind { keys: "c", description: "Clear packet log" },
];

impl App {
    fn new(title: String, log: Arc<Mutex<PacketLog>>, filter: LogFilter, show_hex: bool) -> Self {
        Self {
            log,
            filter,
            title,
            show_hex,
            selected: 0,
            visible: Vec::new(),
            paused: false,
            filter_editing: false,
            filter_edit_text: String::new(),
            status_msg: String::new(),
            show_help: false,
        }
    }

    /// Rebuild the filtered view from the shared log (newest first)
    fn refresh_visible(&mut self) {
        if self.paused {
            return;
        }
        let log = self.log.lock();
        self.visible = log
            .iter()
            .filter(|e| self.filter.matches(e))
            .cloned()
            .collect();
        if self.selected >= self.visible.len() {
            self.selected = self.visible.len().saturating_sub(1);
        }
    }

    fn apply_text_filter(&mut self) {
        let text = self.filter_edit_text.trim();
        self.filter.text = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
        self.status_msg = if text.is_empty() {
            "Text filter cleared".to_string()
        } else {
            format!("Filtering on '{text}'")
        };
        self.selected = 0;
        self.paused = false;
        self.refresh_visible();
    }

    fn toggle_category(&mut self, category: Category) {
        self.filter.toggle(category);
        let state = if self.filter.enabled(category) { "shown" } else { "hidden" };
        self.status_msg = format!("{} {state}", category.label());
        self.selected = 0;
        self.refresh_visible();
    }

    fn clear(&mut self) {
        self.log.lock().clear();
        self.visible.clear();
        self.selected = 0;
        self.status_msg = "Packet log cleared".to_string();
    }

    fn selected_envelope(&self) -> Option<&Envelope> {
        self.visible.get(self.selected)
    }
}

/// Run the panel over a shared packet log until the user quits.
/// Blocking; call from a dedicated thread.
pub fn run(
    title: String,
    log: Arc<Mutex<PacketLog>>,
    filter: LogFilter,
    show_hex: bool,
) -> io::Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, App::new(title, log, filter, show_hex));

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> io::Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    app.refresh_visible();

    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    // Filter editing captures all keys
                    if app.filter_editing {
                        match key.code {
                            KeyCode::Esc => {
                                app.filter_editing = false;
                                app.filter_edit_text.clear();
                                app.status_msg = "Filter edit cancelled".to_string();
                            }
                            KeyCode::Enter => {
                                app.filter_editing = false;
                                app.apply_text_filter();
                            }
                            KeyCode::Backspace => {
                                app.filter_edit_text.pop();
                            }
                            KeyCode::Char(c) => {
                                if app.filter_edit_text.len() < 64 {
                                    app.filter_edit_text.push(c);
                                }
                            }
                            _ => {}
                        }
                        continue;
                    }

                    if app.show_help {
                        match key.code {
                            KeyCode::Char('?') | KeyCode::Esc | KeyCode::F(1) => {
                                app.show_help = false;
                            }
                            _ => {}
                        }
                        continue;
                    }

                    match key.code {
                        KeyCode::Char('?') | KeyCode::F(1) => app.show_help = true,
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Up | KeyCode::Char('k') => {
                            if app.selected + 1 < app.visible.len() {
                                app.selected += 1;
                            }
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            app.selected = app.selected.saturating_sub(1);
                        }
                        KeyCode::PageUp => {
                            let max = app.visible.len().saturating_sub(1);
                            app.selected = (app.selected + 15).min(max);
                        }
                        KeyCode::PageDown => {
                            app.selected = app.selected.saturating_sub(15);
                        }
                        KeyCode::Home => app.selected = 0,
                        KeyCode::Char('/') => {
                            app.filter_editing = true;
                            app.filter_edit_text = app.filter.text.clone().unwrap_or_default();
                        }
                        KeyCode::Char('1') => app.toggle_category(Category::Reports),
                        KeyCode::Char('2') => app.toggle_category(Category::FeatureReports),
                        KeyCode::Char('3') => app.toggle_category(Category::Lifecycle),
                        KeyCode::Char('4') => app.toggle_category(Category::Discovery),
                        KeyCode::Char('x') => app.show_hex = !app.show_hex,
                        KeyCode::Char(' ') => {
                            app.paused = !app.paused;
                            app.status_msg = if app.paused {
                                "Paused".to_string()
                            } else {
                                "Live".to_string()
                            };
                        }
                        KeyCode::Char('c') => app.clear(),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.refresh_visible();
            last_tick = Instant::now();
        }
    }

    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let detail_height = if app.show_hex { 7 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(detail_height),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_title(f, app, chunks[0]);
    render_packet_table(f, app, chunks[1]);
    if app.show_hex {
        render_detail(f, app, chunks[2]);
    }
    render_status(f, app, chunks[3]);

    if app.show_help {
        render_help(f);
    }
}

fn render_title(f: &mut Frame, app: &App, area: Rect) {
    let title = Paragraph::new(format!("HID Traffic Monitor - {}", app.title))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, area);
}

fn direction_style(envelope: &Envelope) -> Style {
    use hidscope_capture::EventType::*;
    match envelope.event_type {
        IncomingReport | IncomingFeatureReport => Style::default().fg(Color::Green),
        OutgoingReport | OutgoingFeatureReport => Style::default().fg(Color::Cyan),
        RequestFeatureReport | RequestDevice | RequestDeviceResult => {
            Style::default().fg(Color::Magenta)
        }
        _ => Style::default().fg(Color::Yellow),
    }
}

fn render_packet_table(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .visible
        .iter()
        .map(|e| {
            let bytes = e.data.bytes().map(to_hex_string).unwrap_or_default();
            let summary = summarize(&e.data);
            Row::new(vec![
                Cell::from(pretty_time(e.timestamp)),
                Cell::from(e.event_type.to_string()).style(direction_style(e)),
                Cell::from(summary),
                Cell::from(bytes),
            ])
        })
        .collect();

    let retained = app.log.lock().len();
    let table_title = format!(
        "Packets [{} shown / {} retained, cap {}]{}",
        app.visible.len(),
        retained,
        MAX_PACKETS,
        if app.paused { " PAUSED" } else { "" }
    );
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(24),
            Constraint::Min(24),
            Constraint::Percentage(40),
        ],
    )
    .header(
        Row::new(vec!["Time", "Event", "Detail", "Bytes"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .block(Block::default().borders(Borders::ALL).title(table_title));

    let mut state = TableState::default();
    state.select(if app.visible.is_empty() {
        None
    } else {
        Some(app.selected)
    });
    f.render_stateful_widget(table, area, &mut state);
}

fn render_detail(f: &mut Frame, app: &App, area: Rect) {
    let lines: Vec<Line> = match app.selected_envelope() {
        Some(envelope) => {
            let mut lines = vec![Line::from(vec![
                Span::styled("Event: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(envelope.event_type.to_string()),
                Span::raw("  "),
                Span::styled("Time: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(pretty_time(envelope.timestamp)),
            ])];
            match &envelope.data {
                EventData::Report(r) => {
                    if let Some(id) = r.report_id {
                        lines.push(Line::from(format!("Report ID: {id:#04x}")));
                    }
                    // Wrap hex at 16 bytes per line
                    for chunk in r.data.chunks(16) {
                        lines.push(Line::from(to_hex_string(chunk)));
                    }
                }
                data => lines.push(Line::from(summarize(data))),
            }
            lines
        }
        None => vec![Line::from("No packet selected")],
    };

    let detail = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Detail [x]"));
    f.render_widget(detail, area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let content = if app.filter_editing {
        Line::from(vec![
            Span::styled("Filter: ", Style::default().fg(Color::Yellow)),
            Span::raw(app.filter_edit_text.clone()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ])
    } else {
        let categories: String = Category::ALL
            .iter()
            .map(|&c| {
                if app.filter.enabled(c) {
                    c.label().chars().next().unwrap_or('?').to_ascii_uppercase()
                } else {
                    '.'
                }
            })
            .collect();
        let text = app
            .filter
            .text
            .as_ref()
            .map(|t| format!(" /{t}"))
            .unwrap_or_default();
        Line::from(vec![
            Span::styled(
                format!("[{categories}]{text} "),
                Style::default().fg(Color::Yellow),
            ),
            Span::raw(app.status_msg.clone()),
            Span::styled(
                "  (? for help)",
                Style::default().fg(Color::DarkGray),
            ),
        ])
    };
    let status = Paragraph::new(content).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, area);
}

fn render_help(f: &mut Frame) {
    let area = centered_rect(50, 60, f.area());
    f.render_widget(Clear, area);

    let rows: Vec<Row> = PANEL_KEYBINDS
        .iter()
        .map(|kb| {
            Row::new(vec![
                Cell::from(kb.keys).style(Style::default().fg(Color::Yellow)),
                Cell::from(kb.description),
            ])
        })
        .collect();
    let table = Table::new(rows, [Constraint::Length(14), Constraint::Min(20)]).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Keybindings [? to close]"),
    );
    f.render_widget(table, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidscope_capture::{DeviceDescriptor, EventType};
    use ratatui::backend::TestBackend;

    fn sample_log() -> Arc<Mutex<PacketLog>> {
        let mut log = PacketLog::new();
        log.push(Envelope::new(
            EventType::OutgoingReport,
            EventData::report(
                3,
                vec![1, 2, 3],
                DeviceDescriptor {
                    vendor_id: 0x3151,
                    product_id: 0x4015,
                    product_name: "Test Mouse".to_string(),
                },
            ),
        ));
        Arc::new(Mutex::new(log))
    }

    fn render(app: &App) -> String {
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| ui(f, app)).unwrap();
        format!("{:?}", terminal.backend().buffer())
    }

    #[test]
    fn test_status_bar_shows_text_filter() {
        let filter = LogFilter::with_text(Some("mouse".to_string()));
        let mut app = App::new("Test Mouse".to_string(), sample_log(), filter, false);
        app.refresh_visible();

        let rendered = render(&app);
        assert!(rendered.contains("/mouse"), "active text filter missing from status bar");
        assert!(rendered.contains("[RFLD]"), "category flags missing from status bar");
        assert!(rendered.contains("01 02 03"), "matching packet missing from table");
    }

    #[test]
    fn test_status_bar_marks_disabled_category() {
        let filter = LogFilter::with_text(None);
        let mut app = App::new("Test Mouse".to_string(), sample_log(), filter, false);
        app.toggle_category(Category::Lifecycle);

        let rendered = render(&app);
        assert!(rendered.contains("[RF.D]"), "disabled category should render as a dot");
        assert!(rendered.contains("lifecycle hidden"));
    }
}
