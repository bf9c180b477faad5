use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};
use std::{io, time::Duration};

use clap::Parser;
use book_mirror::{Engine, EngineConfig, Price, Quantity, SyntheticFeed};

/// Live book viewer: top levels of both sides with depth bars.
#[derive(Parser)]
#[command(name = "tui-demo", about = "Live order book mirror viewer")]
struct Args {
    /// Product to mirror
    #[arg(default_value = "BTC-USD")]
    product: String,

    /// Mirror the live exchange feed instead of the synthetic walk
    #[arg(long)]
    live: bool,

    /// PRNG seed for the synthetic feed
    #[arg(long, default_value_t = 12345)]
    seed: u64,
}

// Helper to generate the ASCII bar string
fn render_level_bars(levels: &[(Price, Quantity)]) -> String {
    let mut out = String::new();
    let max_qty = levels
        .iter()
        .map(|(_, q)| *q)
        .fold(f64::MIN_POSITIVE, f64::max);

    for (price, qty) in levels {
        // 20-char bar scaled to the deepest visible level
        let bar_len = ((qty / max_qty) * 20.0) as usize;
        let bar = "█".repeat(bar_len);
        out.push_str(&format!("{:>12} {} {:<8.3}\n", format!("${price}"), bar, qty));
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Bring the mirror up before touching the terminal, so connection
    // errors print normally.
    let mut engine = if args.live {
        Engine::connect(EngineConfig::new(args.product.as_str()))?
    } else {
        Engine::with_feed(
            EngineConfig::new(args.product.as_str()),
            SyntheticFeed::new(args.seed),
        )?
    };
    book_mirror::register_thread();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let book = engine.book();
    let source = if args.live { "live" } else { "synthetic" };

    loop {
        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }

        // Top 15 levels per side, read lock-free off the live maps
        let bids: Vec<_> = book.iter_bids().take(15).collect();
        let asks: Vec<_> = book.iter_asks().take(15).collect();

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints(
                    [
                        Constraint::Length(3), // Header
                        Constraint::Min(10),   // Book
                        Constraint::Length(6), // Stats
                    ]
                    .as_ref(),
                )
                .split(f.size());

            // 1. Header
            let header = Block::default().borders(Borders::ALL).title("BOOK-MIRROR");
            let title = Paragraph::new(format!(
                "{} ({source}) | Press 'q' to quit",
                engine.product()
            ))
            .block(header)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Cyan));
            f.render_widget(title, chunks[0]);

            // 2. Book
            let book_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);

            let bids_widget = Paragraph::new(render_level_bars(&bids)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("BIDS")
                    .style(Style::default().fg(Color::Green)),
            );
            let asks_widget = Paragraph::new(render_level_bars(&asks)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("ASKS")
                    .style(Style::default().fg(Color::Red)),
            );
            f.render_widget(bids_widget, book_chunks[0]);
            f.render_widget(asks_widget, book_chunks[1]);

            // 3. Stats
            let spread = book
                .spread()
                .map(|c| format!("{c}c"))
                .unwrap_or_else(|| "-".to_string());
            let stats_text = format!(
                "Spread: {}\nLevels: {} bid / {} ask\nQueue depth: {}",
                spread,
                book.bids().len(),
                book.asks().len(),
                engine.queue_depth(),
            );
            let stats_block = Paragraph::new(stats_text)
                .block(Block::default().borders(Borders::ALL).title("Mirror Telemetry"))
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(stats_block, chunks[2]);
        })?;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    engine.stop();
    Ok(())
}
