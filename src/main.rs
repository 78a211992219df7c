//! Entry point for the narrator.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml`.
//! - Load the book and any stored progress.
//! - Run the narration loop, feeding it commands typed on stdin.

use anyhow::{Context, Result, anyhow};
use narrator::audio::RodioOutput;
use narrator::book::load_book;
use narrator::cache::FileProgressStore;
use narrator::config::load_config;
use narrator::narration::{NarrationSession, NarrationSnapshot, Notice, SessionSettings};
use narrator::runtime::{Report, Request, parse_request, run_session};
use narrator::synthesis::HttpSynthesisGateway;
use std::env;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let book_path = parse_args()?;
    let config = load_config(Path::new("conf/config.toml"));
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %book_path.display(),
        level = %config.log_level,
        "Starting narrator"
    );
    info!(
        voice = %config.voice,
        rate = config.playback_rate,
        cache_capacity = config.cache_capacity,
        debounce_ms = config.progress_debounce_ms,
        "Active narration configuration"
    );

    let book = Arc::new(load_book(&book_path)?);
    let store = FileProgressStore::new(&config.progress_store_dir);
    let resume = store.load(&book.id);
    if let Some(record) = &resume {
        info!(
            chapter = ?record.chapter,
            sentence = ?record.sentence,
            percent = ?record.percent,
            "Resuming from stored progress"
        );
    }

    // Built before the runtime starts; the blocking client must not be
    // created or dropped on an async thread.
    let gateway = Arc::new(HttpSynthesisGateway::from_config(&config)?);
    let audio = RodioOutput::open_default()?;
    let mut session = NarrationSession::open(
        Arc::clone(&book),
        SessionSettings::from_config(&config),
        resume.as_ref(),
        audio,
        store,
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let quit_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(Request::Quit);
    })
    .context("Installing Ctrl-C handler")?;
    spawn_stdin_reader(tx);
    print_status(&session.snapshot(std::time::Instant::now()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Building event loop")?;
    runtime.block_on(run_session(
        &mut session,
        Arc::clone(&gateway),
        rx,
        print_report,
    ));
    runtime.shutdown_background();

    session.close().context("Saving final progress")?;
    info!("Narrator exited cleanly");
    Ok(())
}

fn parse_args() -> Result<PathBuf> {
    let mut args = env::args().skip(1);
    let path = args
        .next()
        .ok_or_else(|| anyhow!("Usage: narrator <path-to-book>"))?;

    let path = PathBuf::from(path);
    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.as_path().display()));
    }
    Ok(path)
}

fn spawn_stdin_reader(tx: UnboundedSender<Request>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Reading stdin failed: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_request(&line) {
                Ok(request) => {
                    if tx.send(request).is_err() {
                        return;
                    }
                }
                Err(err) => eprintln!("? {err:#}"),
            }
        }
        let _ = tx.send(Request::Quit);
    });
}

fn print_report(report: Report) {
    match report {
        Report::Event(event) => {
            let snapshot = &event.snapshot;
            println!(
                "[{}] {} at {} ({}%)",
                event.action, snapshot.state, snapshot.coordinate, snapshot.percent
            );
        }
        Report::Rejected { action, error } => eprintln!("[{action}] rejected: {error}"),
        Report::Notice(Notice::Failure(err)) => {
            eprintln!("Narration stopped: {err}. Type `play` to retry.")
        }
        Report::Notice(Notice::PersistenceWarning(err)) => eprintln!("Warning: {err}"),
        Report::Notice(Notice::BookFinished) => println!("Finished the book."),
        Report::Notice(Notice::SleepTimerElapsed) => println!("Sleep timer elapsed; paused."),
        Report::Status(snapshot) => print_status(&snapshot),
    }
}

fn print_status(snapshot: &NarrationSnapshot) {
    let byline = snapshot
        .author
        .as_deref()
        .map(|author| format!(" by {author}"))
        .unwrap_or_default();
    println!("{}{byline}", snapshot.title);
    println!(
        "  {} at {} of {} ({}%), {} sentences in chapter",
        snapshot.state,
        snapshot.coordinate,
        snapshot.chapter_title.as_deref().unwrap_or("?"),
        snapshot.percent,
        snapshot.chapter_sentence_count
    );
    if let Some(sentence) = &snapshot.sentence {
        println!("  \"{sentence}\"");
    }
    println!(
        "  voice {} rate {:.2} volume {:.2}, {}/{} sentences cached, {} prefetching",
        snapshot.voice,
        snapshot.playback_rate,
        snapshot.volume,
        snapshot.cached_sentences,
        snapshot.cache_capacity,
        snapshot.prefetching
    );
    if let Some(remaining) = snapshot.sleep_timer_remaining {
        println!("  sleep timer: {}s left", remaining.as_secs());
    }
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    info!("Logging initialized; override level with config.log_level or RUST_LOG");
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
