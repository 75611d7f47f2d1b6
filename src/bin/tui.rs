// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fancurve-tui: terminal curve editor. Runs the control loop in-process
//! and lets the user reshape the curve by dragging its points with the
//! mouse.

use clap::Parser;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use fancurve_control::config::{self, Config};
use fancurve_control::control::{ControlLoop, ControlLoopState, LoopSettings};
use fancurve_control::curve::Curve;
use fancurve_control::editor::{CurveEditor, PointHandle, Pointer, Viewport};
use fancurve_control::hardware;
use fancurve_control::persist;
use fancurve_control::store::CurveStore;
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Paragraph, Row, Table,
        canvas::{Canvas, Line as CanvasLine},
    },
};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Pick distance in terminal cells.
const PICK_TOLERANCE_CELLS: f64 = 2.0;

/// Speed below which many fans stall; drawn as a guide line.
const STALL_GUIDE_SPEED: f64 = 10.0;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fancurve-tui", about = "Interactive fan curve editor")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the curve file.
    #[arg(long)]
    curve: Option<String>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct App {
    rt: Runtime,
    control: ControlLoop,
    editor: CurveEditor,
    drag: Option<PointHandle>,
    backend_name: String,
    curve_path: PathBuf,
    status_message: String,
    running: bool,
}

impl App {
    /// Apply the draft through the control loop. A rejected draft is
    /// dropped and the last accepted curve shown again.
    fn apply(&mut self) {
        let (rt, control) = (&self.rt, &self.control);
        match self
            .editor
            .commit_with(|draft| rt.block_on(control.set_curve(draft)))
        {
            Ok(accepted) if accepted.changed => {
                self.status_message = "Applied the current curve to the fan".to_string();
            }
            Ok(_) => {
                self.status_message = "Curve unchanged".to_string();
            }
            Err(e) => {
                self.editor.revert();
                self.status_message = format!("Rejected: {e}. Restored previous curve");
            }
        }
        self.drag = None;
    }

    /// Reload the curve file (or the default curve) and apply it.
    fn reset(&mut self) {
        let (curve, err) = persist::load_curve_or_default(&self.curve_path);
        self.editor.revert();
        self.drag = None;
        match self.rt.block_on(self.control.set_curve(curve)) {
            Ok(_) => {
                self.status_message = match err {
                    Some(e) => format!("{e}; reset to the default curve"),
                    None => format!("Reset to {}", self.curve_path.display()),
                };
            }
            Err(e) => self.status_message = format!("Reset failed: {e}"),
        }
    }

    /// Load the curve file into the draft without applying it.
    fn open(&mut self) {
        match persist::load_curve(&self.curve_path) {
            Ok(curve) => {
                self.editor.load_draft(curve);
                self.drag = None;
                self.status_message = format!(
                    "Opened {}; press [a] to apply",
                    self.curve_path.display()
                );
            }
            Err(e) => self.status_message = format!("Open failed: {e}"),
        }
    }

    /// Save the last accepted curve.
    fn save(&mut self) {
        let curve = self.control.store().curve();
        self.status_message = match persist::save_curve(&self.curve_path, &curve) {
            Ok(()) => format!("Saved curve to {}", self.curve_path.display()),
            Err(e) => format!("Save failed: {e}"),
        };
    }

    fn set_manual(&mut self, enabled: bool) {
        let result = if enabled {
            self.rt.block_on(self.control.enable_manual_control())
        } else {
            self.rt.block_on(self.control.disable_manual_control())
        };
        self.status_message = match (result, enabled) {
            (Ok(()), true) => "Manual fan control enabled".to_string(),
            (Ok(()), false) => "Fan returned to automatic control".to_string(),
            (Err(e), _) => format!("Error: {e}"),
        };
    }

    fn shutdown(&mut self) {
        self.rt.block_on(self.control.stop());
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    let curve_path = PathBuf::from(cli.curve.unwrap_or_else(|| cfg.control.curve_path.clone()));
    let (curve, load_error) = persist::load_curve_or_default(&curve_path);
    let store = Arc::new(CurveStore::new(curve)?);

    let backend = hardware::open_backend(&cfg.hardware)?;
    let backend_name = backend.name.clone();

    let rt = Runtime::new()?;
    let mut control = ControlLoop::new(
        store.clone(),
        backend.sensor,
        backend.actuator,
        LoopSettings::from(&cfg.control),
    );
    {
        let _guard = rt.enter();
        control.start();
    }

    let quit = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGQUIT, SIGHUP, SIGTERM] {
        signal_hook::flag::register(sig, quit.clone())?;
    }

    let editor = CurveEditor::new(store, Viewport::default()).with_tolerance(PICK_TOLERANCE_CELLS);
    let mut app = App {
        rt,
        control,
        editor,
        drag: None,
        backend_name,
        curve_path,
        status_message: match load_error {
            Some(e) => format!("{e}; using the default curve"),
            None => String::new(),
        },
        running: true,
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, &quit);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app.shutdown();
    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    quit: &AtomicBool,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(250);

    while app.running && !quit.load(Ordering::Relaxed) {
        let size = terminal.size()?;
        app.editor
            .set_viewport(chart_viewport(Rect::new(0, 0, size.width, size.height)));

        terminal.draw(|f| ui(f, app))?;

        if event::poll(tick_rate)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    handle_key(app, key.code, key.modifiers);
                }
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                _ => {}
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Input handling
// ---------------------------------------------------------------------------

fn handle_key(app: &mut App, key: KeyCode, modifiers: KeyModifiers) {
    match key {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.running = false;
        }
        KeyCode::Char('q') => app.running = false,
        KeyCode::Char('a') => app.apply(),
        KeyCode::Char('r') => app.reset(),
        KeyCode::Char('o') => app.open(),
        KeyCode::Char('s') => app.save(),
        KeyCode::Char('e') => app.set_manual(true),
        KeyCode::Char('d') => app.set_manual(false),
        KeyCode::Esc => {
            if app.editor.is_dragging() {
                app.editor.cancel_drag();
                app.status_message = "Drag cancelled".to_string();
            } else if app.editor.has_pending_changes() {
                app.editor.revert();
                app.status_message = "Discarded unapplied changes".to_string();
            }
            app.drag = None;
        }
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let pointer = Pointer::new(f64::from(mouse.column), f64::from(mouse.row));
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            app.drag = app.editor.begin_drag(pointer);
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            if let Some(handle) = app.drag {
                app.editor.update_drag(handle, pointer);
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            if let Some(handle) = app.drag.take() {
                app.editor.end_drag(handle);
                if app.editor.has_pending_changes() {
                    app.status_message = "Curve modified; press [a] to apply".to_string();
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// UI rendering
// ---------------------------------------------------------------------------

struct Areas {
    header: Rect,
    chart: Rect,
    side: Rect,
    status: Rect,
}

fn areas(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // chart + side panel
            Constraint::Length(4), // status bar
        ])
        .split(area);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(rows[1]);

    Areas {
        header: rows[0],
        chart: cols[0],
        side: cols[1],
        status: rows[2],
    }
}

/// Screen mapping for the inside of the chart's border, in cells.
fn chart_viewport(area: Rect) -> Viewport {
    let inner = Block::default().borders(Borders::ALL).inner(areas(area).chart);
    Viewport::new(
        f64::from(inner.x),
        f64::from(inner.y),
        f64::from(inner.width.saturating_sub(1)),
        f64::from(inner.height.saturating_sub(1)),
    )
}

fn ui(f: &mut Frame, app: &App) {
    let areas = areas(f.area());
    let state = app.control.state();

    draw_header(f, app, areas.header);
    draw_chart(f, app, &state, areas.chart);
    draw_side_panel(f, app, &state, areas.side);
    draw_status_bar(f, app, &state, areas.status);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let title = Line::from(vec![
        Span::styled(
            " fancurve ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " {}  ·  curve file {}",
            app.backend_name,
            app.curve_path.display()
        )),
    ]);
    let header = Paragraph::new(title).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn draw_chart(f: &mut Frame, app: &App, state: &ControlLoopState, area: Rect) {
    let curve = app.editor.displayed();
    let points: Vec<(f64, f64)> = curve
        .points()
        .iter()
        .map(|p| (f64::from(p.temperature()), f64::from(p.speed())))
        .collect();
    let grabbed = app.editor.active_handle().map(|h| h.index());
    let operating = state
        .current_temperature
        .zip(state.current_speed)
        .map(|(t, s)| (f64::from(t), f64::from(s)));

    let title = if app.editor.has_pending_changes() {
        " Fan Curve (modified) "
    } else {
        " Fan Curve "
    };
    let (t0, t1) = Viewport::TEMP_RANGE;
    let (s0, s1) = Viewport::SPEED_RANGE;

    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .marker(Marker::Braille)
        .x_bounds([t0, t1])
        .y_bounds([s0, s1])
        .paint(|ctx| {
            ctx.draw(&CanvasLine::new(
                t0,
                STALL_GUIDE_SPEED,
                t1,
                STALL_GUIDE_SPEED,
                Color::Red,
            ));
            for w in points.windows(2) {
                ctx.draw(&CanvasLine::new(w[0].0, w[0].1, w[1].0, w[1].1, Color::Blue));
            }
            ctx.layer();
            for (i, &(t, s)) in points.iter().enumerate() {
                let color = if Some(i) == grabbed {
                    Color::Yellow
                } else {
                    Color::Cyan
                };
                ctx.print(t, s, Span::styled("■", Style::default().fg(color)));
            }
            if let Some((t, s)) = operating {
                ctx.print(t, s, Span::styled("●", Style::default().fg(Color::Green)));
            }
        });

    f.render_widget(canvas, area);
}

fn draw_side_panel(f: &mut Frame, app: &App, state: &ControlLoopState, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(0)])
        .split(area);

    let loop_state = match (state.running, state.paused) {
        (false, _) => Span::styled("stopped", Style::default().fg(Color::Red)),
        (true, true) => Span::styled("paused", Style::default().fg(Color::Yellow)),
        (true, false) => Span::styled("running", Style::default().fg(Color::Green)),
    };
    let mode = if state.manual_control {
        Span::styled("manual", Style::default().fg(Color::Magenta))
    } else {
        Span::styled("automatic", Style::default().fg(Color::Gray))
    };
    let temperature = state
        .current_temperature
        .map(|t| {
            let color = if t >= 80 {
                Color::Red
            } else if t >= 60 {
                Color::Yellow
            } else {
                Color::Green
            };
            Span::styled(format!("{t}°C"), Style::default().fg(color))
        })
        .unwrap_or_else(|| Span::raw("-"));
    let percent = |v: Option<u8>| v.map(|v| format!("{v}%")).unwrap_or_else(|| "-".to_string());

    let lines = vec![
        Line::from(vec![Span::raw("Loop:        "), loop_state]),
        Line::from(vec![Span::raw("Control:     "), mode]),
        Line::from(vec![Span::raw("Temperature: "), temperature]),
        Line::from(format!("Target:      {}", percent(state.current_speed))),
        Line::from(format!("Fan reports: {}", percent(state.reported_speed))),
        Line::from(format!("Ticks:       {}", state.ticks)),
        Line::from(Span::styled(
            state.last_error.clone().unwrap_or_default(),
            Style::default().fg(Color::Red),
        )),
    ];
    let status = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Status "),
    );
    f.render_widget(status, chunks[0]);

    f.render_widget(points_table(&app.editor.displayed(), app.editor.active_handle()), chunks[1]);
}

fn points_table(curve: &Curve, grabbed: Option<PointHandle>) -> Table<'static> {
    let rows: Vec<Row> = curve
        .points()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let style = if grabbed.is_some_and(|h| h.index() == i) {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(format!("{}", i + 1)),
                Cell::from(format!("{}°C", p.temperature())),
                Cell::from(format!("{}%", p.speed())),
            ])
            .style(style)
        })
        .collect();

    Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(
        Row::new(vec!["#", "Temp", "Speed"]).style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Points "),
    )
}

fn draw_status_bar(f: &mut Frame, app: &App, state: &ControlLoopState, area: Rect) {
    let health = if state.last_error.is_some() {
        Span::styled(
            " HARDWARE ERROR ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            " OK ",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )
    };
    let msg = Span::raw(format!("  {}", app.status_message));
    let help = " [drag] move point  [Esc] cancel  [a]pply [r]eset [o]pen [s]ave  [e]nable [d]isable  [q]uit ";

    let paragraph = Paragraph::new(vec![
        Line::from(vec![health, msg]),
        Line::from(Span::styled(help, Style::default().fg(Color::DarkGray))),
    ])
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(paragraph, area);
}
