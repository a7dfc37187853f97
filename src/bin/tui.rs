mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Tabs},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use dealzo::api::feed_socket::FeedFrame;
use dealzo::feed::synchronizer::backoff_delay;
use tui_app::{format_price, truncate, AppState, ConnectionStatus, SPECIAL_BADGE};

enum FeedEvent {
    Frame(FeedFrame),
    Lost(String),
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.bootstrap(&client).await;

    let (feed_tx, feed_rx) = mpsc::channel(16);
    let follower = tokio::spawn(follow_feed(app.feed_url(), feed_tx));

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client, feed_rx).await;
    follower.abort();

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

/// Follows `/feed/ws`, reconnecting with backoff until the receiver goes away.
async fn follow_feed(url: String, tx: mpsc::Sender<FeedEvent>) {
    let mut attempt = 0usize;

    loop {
        let reason = match connect_async(url.as_str()).await {
            Ok((mut socket, _)) => {
                attempt = 0;
                loop {
                    match socket.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<FeedFrame>(&text) {
                                Ok(frame) => {
                                    if tx.send(FeedEvent::Frame(frame)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => break format!("bad feed frame: {e}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break "feed closed".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("{e}"),
                    }
                }
            }
            Err(e) => format!("{e}"),
        };

        if tx.send(FeedEvent::Lost(reason)).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    mut feed_rx: mpsc::Receiver<FeedEvent>,
) -> io::Result<()> {
    // Redraw often enough for the 1s countdowns.
    let frame_interval = Duration::from_millis(200);
    let mut table_state = TableState::default();

    loop {
        while let Ok(event) = feed_rx.try_recv() {
            match event {
                FeedEvent::Frame(frame) => app.apply_frame(frame),
                FeedEvent::Lost(reason) => app.feed_lost(reason),
            }
        }

        table_state.select(Some(app.selected));
        terminal.draw(|f| render(f, app, &mut table_state))?;

        if !event::poll(frame_interval)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.searching {
            match key.code {
                KeyCode::Esc => app.clear_query(),
                KeyCode::Enter => app.searching = false,
                KeyCode::Backspace => app.pop_query(),
                KeyCode::Char(c) => app.push_query(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
            KeyCode::Char('r') | KeyCode::Char('R') => app.request_retry(client).await,
            KeyCode::Char('/') => app.searching = true,
            KeyCode::Esc => app.clear_query(),
            KeyCode::Right | KeyCode::Tab => app.next_tab(),
            KeyCode::Left | KeyCode::BackTab => app.prev_tab(),
            KeyCode::Down | KeyCode::Char('j') => app.select_next(),
            KeyCode::Up | KeyCode::Char('k') => app.select_prev(),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, table_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | tabs | search | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(1), // tabs
            Constraint::Length(1), // search
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_tabs(f, app, chunks[1]);
    render_search(f, app, chunks[2]);
    render_deals_table(f, app, table_state, chunks[3]);
    render_footer(f, chunks[4]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Live => ("● live".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Degraded(e) => (format!("◍ degraded: {}", truncate(e, 40)), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let title_spans = vec![
        Span::styled(
            " Dealzo  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "Currently Showing {} ({})",
                app.filter.category.label(),
                app.visible().len()
            ),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} deals live", app.deals.len()),
            Style::default().fg(Color::White),
        ),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_tabs(f: &mut Frame, app: &AppState, area: Rect) {
    let titles: Vec<Line> = app.tabs().iter().map(|t| Line::from(t.label())).collect();
    let tabs = Tabs::new(titles)
        .select(app.tab_index())
        .style(Style::default().fg(Color::DarkGray))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, area);
}

fn render_search(f: &mut Frame, app: &AppState, area: Rect) {
    let (prompt, style) = if app.searching {
        ("search> ", Style::default().fg(Color::Yellow))
    } else {
        ("search  ", Style::default().fg(Color::DarkGray))
    };
    let mut spans = vec![
        Span::styled(format!(" {prompt}"), style),
        Span::raw(app.filter.query.clone()),
    ];
    if app.searching {
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_deals_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let visible = app.visible();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            " DEALS ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));

    if visible.is_empty() {
        let message = if app.deals.is_empty() {
            "No deals yet. Check back soon."
        } else {
            "No deals match your filters."
        };
        let paragraph = Paragraph::new(Span::styled(message, Style::default().fg(Color::DarkGray)))
            .block(block);
        f.render_widget(paragraph, area);
        return;
    }

    let header_cells = ["Deal", "Store", "Price", "Was", "Off", "Ends in", "Watching"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = visible
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let countdown = app.countdown_label(&d.id);
            let countdown_color = if countdown == dealzo::countdown::EXPIRED_LABEL {
                Color::Red
            } else {
                Color::White
            };
            let title = if d.verified {
                format!("✔ {}", truncate(&d.title, 36))
            } else {
                truncate(&d.title, 38)
            };
            let title = if app.is_special(i) {
                Line::from(vec![
                    Span::styled(
                        format!("{SPECIAL_BADGE} "),
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(title),
                ])
            } else {
                Line::from(title)
            };

            Row::new(vec![
                Cell::from(title),
                Cell::from(d.platform.to_string()).style(Style::default().fg(Color::Cyan)),
                Cell::from(format_price(d.price)).style(Style::default().fg(Color::Green)),
                Cell::from(format_price(d.original_price)).style(
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::CROSSED_OUT),
                ),
                Cell::from(format!("{}%", d.discount_percent())).style(Style::default().fg(Color::Yellow)),
                Cell::from(countdown).style(Style::default().fg(countdown_color)),
                Cell::from(d.trending_count.to_string()).style(Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(36),
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(5),
            Constraint::Length(12),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block)
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[←→] ", Style::default().fg(Color::Yellow)),
        Span::raw("category  "),
        Span::styled("[/] ", Style::default().fg(Color::Yellow)),
        Span::raw("search  "),
        Span::styled("[esc] ", Style::default().fg(Color::Yellow)),
        Span::raw("clear  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("retry feed  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll"),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
