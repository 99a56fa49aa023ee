mod app;
mod apps;
mod commands;
mod console;
mod model;
mod msg;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use app::Shell;
use apps::fetch::HttpFetcher;
use console::{InputGate, TerminalConsole};
use model::config::ShellConfig;
use msg::Msg;

fn main() -> Result<()> {
    // Initialize logging to file (never stdout)
    let log_dir = directories::ProjectDirs::from("", "", "nullos")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "nullos.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter("nullos=info")
        .init();

    tracing::info!("nullos starting");

    let config = ShellConfig::load()?;
    let result = run(config);

    if let Err(e) = &result {
        tracing::error!("nullos error: {e:?}");
    }
    tracing::info!("nullos exiting");
    result
}

fn run(config: ShellConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Msg>();
    let interrupted = Arc::new(AtomicBool::new(false));

    // Ctrl-C aborts downloads through the flag and declines open prompts.
    let flag = Arc::clone(&interrupted);
    let tx_interrupt = tx.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = tx_interrupt.send(Msg::Interrupt);
    })
    .context("installing Ctrl-C handler")?;

    let watch_targets = vec![
        (
            config
                .repository_path()
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.root_path()),
            RecursiveMode::NonRecursive,
        ),
        (config.applications_path(), RecursiveMode::Recursive),
    ];

    let fetcher = HttpFetcher::new(&config.network, Arc::clone(&interrupted));
    let mut shell = Shell::new(config, Box::new(fetcher), interrupted)?;

    let mut input = InputGate::new(spawn_line_reader(tx.clone()));
    let mut deferred: Vec<Msg> = Vec::new();

    println!("nullos shell. Type 'help' for a list of commands.");
    shell.bootstrap(&mut TerminalConsole::new(&rx, &mut input, &mut deferred));

    // Watch after bootstrap so the applications directory exists.
    spawn_file_watcher(watch_targets, tx.clone());

    // ── Main event loop ──
    let mut prompt_shown = false;
    while !shell.should_quit {
        if !prompt_shown {
            print!("{}", shell.prompt());
            io::stdout().flush()?;
            prompt_shown = true;
        }
        input.request();

        let msg = if deferred.is_empty() {
            rx.recv()?
        } else {
            deferred.remove(0)
        };

        match msg {
            Msg::FileChanged(_) => {
                let mut console =
                    TerminalConsole::new(&rx, &mut input, &mut deferred).after_prompt();
                shell.update(msg, &mut console);
                if console.interrupted_prompt() {
                    prompt_shown = false;
                }
            }
            Msg::Interrupt => {
                println!();
                prompt_shown = false;
                shell.update(msg, &mut TerminalConsole::new(&rx, &mut input, &mut deferred));
            }
            Msg::Line(_) | Msg::Eof => {
                input.received();
                if matches!(msg, Msg::Eof) {
                    println!();
                }
                prompt_shown = false;
                shell.update(msg, &mut TerminalConsole::new(&rx, &mut input, &mut deferred));
            }
        }
    }

    Ok(())
}

/// Reads one stdin line per request and forwards it as `Msg::Line`.
fn spawn_line_reader(tx: mpsc::Sender<Msg>) -> mpsc::Sender<()> {
    let (request_tx, request_rx) = mpsc::channel::<()>();

    thread::spawn(move || {
        let stdin = io::stdin();
        for () in request_rx {
            let mut line = String::new();
            let msg = match stdin.lock().read_line(&mut line) {
                Ok(0) => Msg::Eof,
                Ok(_) => Msg::Line(line.trim_end_matches(['\r', '\n']).to_string()),
                Err(err) => {
                    tracing::warn!("stdin read failed: {err}");
                    Msg::Eof
                }
            };
            let done = matches!(msg, Msg::Eof);
            if tx.send(msg).is_err() || done {
                break;
            }
        }
    });

    request_tx
}

fn spawn_file_watcher(targets: Vec<(PathBuf, RecursiveMode)>, tx: mpsc::Sender<Msg>) {
    thread::spawn(move || {
        let tx_watch = tx.clone();
        let mut watcher: RecommendedWatcher =
            match notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            if tx_watch.send(Msg::FileChanged(path)).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("file watcher error: {err}");
                }
            }) {
                Ok(w) => w,
                Err(err) => {
                    tracing::warn!("failed to initialize file watcher: {err}");
                    return;
                }
            };

        for (path, mode) in &targets {
            if let Err(err) = watcher.watch(path, *mode) {
                tracing::warn!("failed to watch {}: {err}", path.display());
            }
        }

        loop {
            thread::park();
        }
    });
}
