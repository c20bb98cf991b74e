//! loopcast dashboard TUI
//!
//! Terminal view of a running stream: state, source, encoder progress and
//! host load. Polls the status endpoint, http://127.0.0.1:7878/status by
//! default; pass another URL as the first argument.

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    io::{self, Stdout},
    time::{Duration, Instant},
};

const DEFAULT_STATUS_URL: &str = "http://127.0.0.1:7878/status";
const POLL_INTERVAL_MS: u64 = 500;
const MAX_FPS_POINTS: usize = 120;
const MAX_EVENT_LOG_ENTRIES: usize = 100;

// ============================================================================
// Data Models (mirroring the engine's status snapshot)
// ============================================================================

/// Encoder progress sample
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderMetrics {
    pub frame: u64,
    pub fps: f64,
    pub bitrate: String,
    pub speed: f64,
    pub elapsed: String,
    pub dup_frames: u64,
    pub drop_frames: u64,
}

/// Classified encoder error
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorEntry {
    pub timestamp_unix_ms: i64,
    pub severity: String,
    pub category: String,
    pub message: String,
}

/// Host resource usage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Status snapshot as served by the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusSnapshot {
    pub state: String,
    pub strategy: String,
    pub active_pid: Option<u32>,
    pub current_source: Option<String>,
    pub pending_source: Option<String>,
    pub uptime_secs: f64,
    pub switch_count: u64,
    pub restart_count: u32,
    pub max_restart_attempts: u32,
    pub healthy: bool,
    pub health_issue: Option<String>,
    pub metrics: Option<EncoderMetrics>,
    pub recent_errors: Vec<ErrorEntry>,
    pub last_error: Option<String>,
    pub system: SystemMetrics,
    pub timestamp_unix_ms: i64,
}

/// Human-readable lines for what changed between two snapshots
pub fn describe_changes(prev: &StatusSnapshot, next: &StatusSnapshot) -> Vec<String> {
    let mut changes = Vec::new();
    if prev.state != next.state {
        changes.push(format!("state {} -> {}", prev.state, next.state));
    }
    if prev.current_source != next.current_source {
        if let Some(source) = &next.current_source {
            changes.push(format!("now playing {}", source));
        }
    }
    if next.switch_count > prev.switch_count {
        changes.push(format!("switch #{} completed", next.switch_count));
    }
    if next.restart_count > prev.restart_count {
        changes.push(format!(
            "restart {}/{}",
            next.restart_count, next.max_restart_attempts
        ));
    }
    if prev.active_pid != next.active_pid {
        if let Some(pid) = next.active_pid {
            changes.push(format!("encoder pid {}", pid));
        }
    }
    if prev.healthy && !next.healthy {
        if let Some(issue) = &next.health_issue {
            changes.push(format!("unhealthy: {}", issue));
        }
    }
    if next.last_error.is_some() && prev.last_error != next.last_error {
        if let Some(err) = &next.last_error {
            changes.push(format!("error: {}", err));
        }
    }
    changes
}

// ============================================================================
// App State
// ============================================================================

pub struct App {
    pub status: Option<StatusSnapshot>,
    pub event_log: VecDeque<String>,
    /// (seconds since dashboard start, encoder fps)
    pub fps_history: VecDeque<(f64, f64)>,
    pub connected: bool,
    url: String,
    client: reqwest::Client,
    start_time: Instant,
}

impl App {
    pub fn new(url: String) -> Self {
        Self {
            status: None,
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
            fps_history: VecDeque::with_capacity(MAX_FPS_POINTS),
            connected: false,
            url,
            client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }

    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    /// Fetch the status snapshot. /health answers 503 with a body, so any
    /// parseable response counts as connected.
    pub async fn fetch_status(&mut self) {
        match self.client.get(&self.url).send().await {
            Ok(response) => match response.json::<StatusSnapshot>().await {
                Ok(snapshot) => {
                    if !self.connected {
                        self.log_event(format!("Connected to {}", self.url));
                    }
                    self.connected = true;
                    self.apply(snapshot);
                }
                Err(e) => {
                    self.log_event(format!("JSON parse error: {}", e));
                    self.connected = false;
                }
            },
            Err(e) => {
                if self.connected {
                    self.log_event(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    /// Record a new snapshot, logging what changed since the last one
    pub fn apply(&mut self, snapshot: StatusSnapshot) {
        if let Some(prev) = &self.status {
            for change in describe_changes(prev, &snapshot) {
                self.log_event(change);
            }
        }
        if let Some(metrics) = &snapshot.metrics {
            let elapsed_secs = self.start_time.elapsed().as_secs_f64();
            if self.fps_history.len() >= MAX_FPS_POINTS {
                self.fps_history.pop_front();
            }
            self.fps_history.push_back((elapsed_secs, metrics.fps));
        }
        self.status = Some(snapshot);
    }
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

fn state_color(state: &str) -> Color {
    match state {
        "running" => Color::Green,
        "switching" | "starting" | "stopping" => Color::Yellow,
        "error" => Color::Red,
        _ => Color::Gray,
    }
}

/// Render the stream panel: state, source and encoder progress
fn render_stream_panel(f: &mut Frame, area: Rect, app: &App) {
    let title = if app.connected {
        " Stream "
    } else {
        " Stream (Disconnected) "
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    let Some(status) = &app.status else {
        f.render_widget(Paragraph::new("Waiting for status...").block(block), area);
        return;
    };

    let label = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let none = || "-".to_string();
    let mut lines = vec![
        Line::from(vec![
            Span::styled("State     ", label),
            Span::styled(
                status.state.to_uppercase(),
                Style::default()
                    .fg(state_color(&status.state))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("  ({})", status.strategy)),
        ]),
        Line::from(vec![
            Span::styled("Source    ", label),
            Span::raw(status.current_source.clone().unwrap_or_else(none)),
        ]),
    ];
    if let Some(pending) = &status.pending_source {
        lines.push(Line::from(vec![
            Span::styled("Pending   ", label),
            Span::raw(pending.clone()),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled("PID       ", label),
        Span::raw(status.active_pid.map(|p| p.to_string()).unwrap_or_else(none)),
        Span::styled("   Uptime ", label),
        Span::raw(format_duration(status.uptime_secs)),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Switches  ", label),
        Span::raw(status.switch_count.to_string()),
        Span::styled("   Restarts ", label),
        Span::raw(format!(
            "{}/{}",
            status.restart_count, status.max_restart_attempts
        )),
    ]));
    let health = match (&status.health_issue, status.healthy) {
        (_, true) => Span::styled("healthy", Style::default().fg(Color::Green)),
        (Some(issue), false) => Span::styled(issue.clone(), Style::default().fg(Color::Red)),
        (None, false) => Span::raw("-"),
    };
    lines.push(Line::from(vec![Span::styled("Health    ", label), health]));
    if let Some(m) = &status.metrics {
        lines.push(Line::from(vec![
            Span::styled("Encoder   ", label),
            Span::raw(format!(
                "frame {}  fps {:.1}  {}  speed {:.2}x  time {}  dup {}  drop {}",
                m.frame, m.fps, m.bitrate, m.speed, m.elapsed, m.dup_frames, m.drop_frames
            )),
        ]));
    }
    if let Some(err) = &status.last_error {
        lines.push(Line::from(vec![
            Span::styled("Last error ", label),
            Span::styled(err.clone(), Style::default().fg(Color::Red)),
        ]));
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

/// Render the classified encoder errors, newest first
fn render_error_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["Severity", "Category", "Message"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .status
        .iter()
        .flat_map(|s| s.recent_errors.iter().rev())
        .map(|e| {
            let color = match e.severity.as_str() {
                "fatal" => Color::Red,
                "error" => Color::LightRed,
                _ => Color::Gray,
            };
            Row::new(vec![
                Cell::from(e.severity.clone()).style(Style::default().fg(color)),
                Cell::from(e.category.clone()),
                Cell::from(e.message.clone()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(9),
        Constraint::Length(20),
        Constraint::Min(20),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(" Encoder Errors "));

    f.render_widget(table, area);
}

fn render_system_gauges(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    let (cpu_percent, mem_percent) = if let Some(ref status) = app.status {
        (
            status.system.cpu_usage_percent as f64 / 100.0,
            status.system.mem_usage_percent as f64 / 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" CPU "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(cpu_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", cpu_percent * 100.0));

    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Memory "))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(mem_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", mem_percent * 100.0));

    f.render_widget(cpu_gauge, chunks[0]);
    f.render_widget(mem_gauge, chunks[1]);
}

fn render_load_averages(f: &mut Frame, area: Rect, app: &App) {
    let system = app
        .status
        .as_ref()
        .map(|s| s.system.clone())
        .unwrap_or_default();

    let rows = vec![
        Row::new(vec![
            Cell::from("1 min"),
            Cell::from(format!("{:.2}", system.load_avg_1)),
        ]),
        Row::new(vec![
            Cell::from("5 min"),
            Cell::from(format!("{:.2}", system.load_avg_5)),
        ]),
        Row::new(vec![
            Cell::from("15 min"),
            Cell::from(format!("{:.2}", system.load_avg_15)),
        ]),
    ];

    let widths = [Constraint::Length(8), Constraint::Length(10)];
    let table =
        Table::new(rows, widths).block(Block::default().borders(Borders::ALL).title(" Load Avg "));

    f.render_widget(table, area);
}

/// Render encoder fps over time
fn render_fps_chart(f: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app.fps_history.iter().cloned().collect();

    if data.is_empty() {
        let block = Block::default().borders(Borders::ALL).title(" Encoder FPS ");
        f.render_widget(block, area);
        return;
    }

    let min_x = data.first().map(|(x, _)| *x).unwrap_or(0.0);
    let max_x = data.last().map(|(x, _)| *x).unwrap_or(60.0).max(min_x + 1.0);
    let max_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::max).max(1.0) * 1.2;

    let datasets = vec![Dataset::default()
        .name("fps")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(Color::Green))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Encoder FPS "))
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_x, max_x])
                .labels(vec![
                    Span::raw(format!("{:.0}", min_x)),
                    Span::raw(format!("{:.0}", max_x)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("fps")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_y])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.0}", max_y / 2.0)),
                    Span::raw(format!("{:.0}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take((area.height as usize).saturating_sub(2))
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let status = match &app.status {
        Some(s) if app.connected => format!(
            " {} | {} | switches: {} | restarts: {}/{} | Press 'q' to quit ",
            s.state.to_uppercase(),
            s.strategy,
            s.switch_count,
            s.restart_count,
            s.max_restart_attempts
        ),
        _ => format!(" Connecting to {}... | Press 'q' to quit ", app.url),
    };

    let paragraph =
        Paragraph::new(status).style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(paragraph, area);
}

/// Format seconds as a compact duration
fn format_duration(secs: f64) -> String {
    let total_secs = secs.max(0.0) as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Main UI Layout
// ============================================================================

fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(size);

    // Left: stream, errors and events. Right: host and fps chart.
    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(10),
            Constraint::Percentage(40),
            Constraint::Min(0),
        ])
        .split(content_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // CPU + Memory gauges
            Constraint::Length(5), // Load averages
            Constraint::Min(0),    // FPS chart
        ])
        .split(content_chunks[1]);

    render_stream_panel(f, left_chunks[0], app);
    render_error_table(f, left_chunks[1], app);
    render_event_log(f, left_chunks[2], app);
    render_system_gauges(f, right_chunks[0], app);
    render_load_averages(f, right_chunks[1], app);
    render_fps_chart(f, right_chunks[2], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> io::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_STATUS_URL.to_string());

    let mut terminal = setup_terminal()?;

    let mut app = App::new(url);
    app.log_event("loopcast dashboard started".to_string());

    let result = run_app(&mut terminal, &mut app).await;

    restore_terminal(&mut terminal)?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch = Instant::now() - poll_interval; // Fetch immediately on start

    loop {
        if last_fetch.elapsed() >= poll_interval {
            app.fetch_status().await;
            last_fetch = Instant::now();
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn running(source: &str, switches: u64) -> StatusSnapshot {
        StatusSnapshot {
            state: "running".to_string(),
            strategy: "handover".to_string(),
            active_pid: Some(100),
            current_source: Some(source.to_string()),
            switch_count: switches,
            healthy: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parses_engine_snapshot() {
        let json = r#"{
            "state": "switching",
            "strategy": "persistent",
            "active_pid": 4242,
            "current_source": "/loops/a.mp4",
            "pending_source": "/loops/b.mp4",
            "started_at_unix_ms": 1700000000000,
            "uptime_secs": 12.5,
            "switch_count": 3,
            "restart_count": 1,
            "max_restart_attempts": 3,
            "healthy": false,
            "health_issue": null,
            "metrics": {"frame": 300, "fps": 29.97, "bitrate": "4500.0kbits/s", "speed": 1.01,
                        "elapsed": "00:00:10.00", "elapsed_secs": 10.0, "dup_frames": 0,
                        "drop_frames": 2, "updated_at_unix_ms": 1700000000000},
            "recent_errors": [{"timestamp_unix_ms": 1, "severity": "error",
                               "category": "connection-failure", "message": "Connection refused",
                               "raw": "[tcp] Connection refused"}],
            "last_error": null,
            "stderr_tail": [],
            "slots": [],
            "system": {"cpu_usage_percent": 10.0, "mem_usage_percent": 20.0,
                       "load_avg_1": 0.5, "load_avg_5": 0.4, "load_avg_15": 0.3},
            "timestamp_unix_ms": 1700000000500
        }"#;
        let snapshot: StatusSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.state, "switching");
        assert_eq!(snapshot.pending_source.as_deref(), Some("/loops/b.mp4"));
        assert_eq!(snapshot.metrics.as_ref().map(|m| m.drop_frames), Some(2));
        assert_eq!(snapshot.recent_errors[0].category, "connection-failure");
    }

    #[test]
    fn test_describe_switch() {
        let changes = describe_changes(&running("/loops/a.mp4", 0), &running("/loops/b.mp4", 1));
        assert!(changes.contains(&"now playing /loops/b.mp4".to_string()));
        assert!(changes.contains(&"switch #1 completed".to_string()));
    }

    #[test]
    fn test_describe_crash() {
        let mut crashed = running("/loops/a.mp4", 0);
        crashed.state = "error".to_string();
        crashed.healthy = false;
        crashed.last_error = Some("Encoder crashed: exit code 1".to_string());
        let changes = describe_changes(&running("/loops/a.mp4", 0), &crashed);
        assert_eq!(changes[0], "state running -> error");
        assert!(changes.iter().any(|c| c.starts_with("error: ")));
    }

    #[test]
    fn test_apply_records_fps_history() {
        let mut app = App::new(DEFAULT_STATUS_URL.to_string());
        let mut snapshot = running("/loops/a.mp4", 0);
        app.apply(snapshot.clone());
        assert!(app.fps_history.is_empty());

        snapshot.metrics = Some(EncoderMetrics {
            fps: 30.0,
            ..Default::default()
        });
        app.apply(snapshot);
        assert_eq!(app.fps_history.len(), 1);
        assert_eq!(app.fps_history[0].1, 30.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5.0), "5s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(7260.0), "2h 1m");
        assert_eq!(format_duration(-3.0), "0s");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_identical_snapshots_log_nothing(
            switches in 0u64..1000,
            restarts in 0u32..10,
            pid in proptest::option::of(1u32..100_000),
        ) {
            let mut snapshot = running("/loops/a.mp4", switches);
            snapshot.restart_count = restarts;
            snapshot.active_pid = pid;
            prop_assert!(describe_changes(&snapshot, &snapshot).is_empty());
        }

        #[test]
        fn prop_event_log_is_bounded(count in 0usize..300) {
            let mut app = App::new(DEFAULT_STATUS_URL.to_string());
            for i in 0..count {
                app.log_event(format!("event {}", i));
            }
            prop_assert_eq!(app.event_log.len(), count.min(MAX_EVENT_LOG_ENTRIES));
        }
    }
}
