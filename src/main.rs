//! snapmix - terminal mixer for a Snapcast audio server.
//!
//! Connects to the server's JSON-RPC control port, renders one volume gauge
//! per client grouped the way the server groups them, and pushes volume and
//! mute changes back as keys are pressed. Server-side notifications trigger
//! a status refresh so concurrent changes show up live.

mod app;
mod ui;

use std::io::{self, Write};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::prelude::*;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use snapmix::control::Mixer;
use snapmix::rpc::{ConnectionState, Endpoint, RpcError};

use app::{Action, App, FocusTarget};

#[derive(Parser, Debug)]
#[command(name = "snapmix", version, about = "Terminal mixer for a Snapcast server")]
struct Args {
    /// Server address as HOST or HOST:PORT
    #[arg(short, long, default_value = "localhost:1705")]
    server: String,
}

/// Global flag to track if terminal is in raw mode (for panic cleanup)
static TERMINAL_RAW: AtomicBool = AtomicBool::new(false);

/// RAII guard for terminal state management.
/// Ensures terminal is restored to normal state when dropped, even on panic or early return.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        TERMINAL_RAW.store(true, Ordering::SeqCst);

        // If execute! fails, restore terminal state before returning the error
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            TERMINAL_RAW.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        TERMINAL_RAW.store(false, Ordering::SeqCst);
    }
}

/// Install a panic hook that restores terminal state before printing panic info.
fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        if TERMINAL_RAW.load(Ordering::SeqCst) {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            let _ = io::stdout().flush();
        }
        default_hook(panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they do not corrupt the alternate screen; off by
    // default, enabled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .with_writer(io::stderr)
        .init();

    let endpoint: Endpoint = args
        .server
        .parse()
        .with_context(|| format!("invalid server address '{}'", args.server))?;

    info!(%endpoint, "connecting");
    let mixer = Mixer::connect(&endpoint)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;

    install_panic_hook();
    let guard = TerminalGuard::new()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    let result = run(&mut terminal, &mixer).await;

    drop(guard);
    mixer.close().await;
    result
}

async fn run(terminal: &mut Terminal<impl Backend>, mixer: &Mixer) -> Result<()> {
    let mut app = App::new();
    app.connection = mixer.state();

    let mut keys = EventStream::new();
    let mut notifications = mixer.client().subscribe();
    let mut state_rx = mixer.client().state_changes();

    refresh(&mut app, mixer).await;
    app.move_focus(1);

    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        tokio::select! {
            event = keys.next() => {
                let Some(event) = event else { break };
                let event = event.context("terminal event stream failed")?;
                if let Event::Key(key) = event {
                    match app.map_key(key) {
                        Action::Quit => break,
                        Action::Dismiss => {
                            if app.errors.is_empty() {
                                break;
                            }
                            app.errors.clear();
                        }
                        action => {
                            if apply(&mut app, mixer, action).await {
                                refresh(&mut app, mixer).await;
                            }
                        }
                    }
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(value) => {
                        debug!(?value, "notification");
                        refresh(&mut app, mixer).await;
                    }
                    // Missed notifications; a full refresh catches us up.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        refresh(&mut app, mixer).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }
            changed = state_rx.changed() => {
                if changed.is_ok() {
                    app.connection = *state_rx.borrow_and_update();
                }
            }
        }
    }

    Ok(())
}

/// Apply a key action through the mixer. Returns true when the server state
/// may have changed and a refresh is due.
async fn apply(app: &mut App, mixer: &Mixer, action: Action) -> bool {
    let outcome = match action {
        Action::FocusPrev => {
            app.move_focus(-1);
            return false;
        }
        Action::FocusNext => {
            app.move_focus(1);
            return false;
        }
        Action::FocusPrevGroup => {
            app.move_focus_group(-1);
            return false;
        }
        Action::FocusNextGroup => {
            app.move_focus_group(1);
            return false;
        }
        Action::AdjustVolume(delta) => match app.focus_target() {
            Some(FocusTarget::Group(id)) => mixer.adjust_group_volume(&id, delta).await,
            Some(FocusTarget::Client(id)) => mixer.adjust_client_volume(&id, delta).await,
            None => return false,
        },
        Action::SetVolume(percent) => match app.focus_target() {
            Some(FocusTarget::Group(id)) => mixer.set_group_volume_percent(&id, percent).await,
            Some(FocusTarget::Client(id)) => mixer.set_client_volume_percent(&id, percent).await,
            None => return false,
        },
        Action::ToggleMute => match app.focus_target() {
            Some(FocusTarget::Group(id)) => mixer.toggle_group_mute(&id).await.map(|_| ()),
            Some(FocusTarget::Client(id)) => mixer.toggle_client_mute(&id).await.map(|_| ()),
            None => return false,
        },
        Action::Quit | Action::Dismiss | Action::None => return false,
    };

    match outcome {
        Ok(()) => true,
        // Loss of the connection is reported through the state modal instead.
        Err(RpcError::ConnectionLost | RpcError::NotConnected) => false,
        Err(e) => {
            app.push_error(e.to_string());
            false
        }
    }
}

async fn refresh(app: &mut App, mixer: &Mixer) {
    match mixer.get_server_status().await {
        Ok(server) => app.server = server,
        Err(RpcError::ConnectionLost | RpcError::NotConnected) => {}
        Err(e) => app.push_error(format!("status refresh failed: {e}")),
    }
}
