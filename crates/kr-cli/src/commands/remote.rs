//! Keyboard remote: navigation and playback keys sent to the host
//!
//! Keys go out as `Input.ExecuteAction` calls on the JSON-RPC connection.
//! With `--event-server`, keys that have a keyboard-map button are sent as
//! control packets instead, falling back to JSON-RPC when the control
//! channel has been disabled by a failed send.

use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use crossterm::event::{KeyCode, KeyModifiers};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kr_client::control::KEYBOARD_MAP;
use kr_client::methods::{ActionParams, ExecuteAction};
use kr_client::{observer_fn, Connection, ControlChannel, SerialExecutor};
use kr_core::{CallError, ClientConfig};
use kr_protocol::ObserverRole;

use super::Session;
use crate::output::{format_event, print_info, print_success};

/// A key on the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Select,
    Back,
    Home,
    ContextMenu,
    Info,
    PlayPause,
    Stop,
    VolumeUp,
    VolumeDown,
    Mute,
    Osd,
    SkipNext,
    SkipPrevious,
    FastForward,
    Rewind,
    Quit,
}

const HELP: &str = "\
arrows move, enter select, backspace/esc back, h home, c menu, i info
space play/pause, x stop, +/- volume, m mute, o osd, ,/. prev/next, r/f rew/ff
q quits";

impl RemoteKey {
    /// Every key that sends something
    pub const SENDABLE: [RemoteKey; 19] = [
        RemoteKey::Up,
        RemoteKey::Down,
        RemoteKey::Left,
        RemoteKey::Right,
        RemoteKey::Select,
        RemoteKey::Back,
        RemoteKey::Home,
        RemoteKey::ContextMenu,
        RemoteKey::Info,
        RemoteKey::PlayPause,
        RemoteKey::Stop,
        RemoteKey::VolumeUp,
        RemoteKey::VolumeDown,
        RemoteKey::Mute,
        RemoteKey::Osd,
        RemoteKey::SkipNext,
        RemoteKey::SkipPrevious,
        RemoteKey::FastForward,
        RemoteKey::Rewind,
    ];

    /// Map a terminal key press
    pub fn from_key(code: KeyCode, modifiers: KeyModifiers) -> Option<Self> {
        if modifiers.contains(KeyModifiers::CONTROL) {
            return match code {
                KeyCode::Char('c') | KeyCode::Char('d') => Some(RemoteKey::Quit),
                _ => None,
            };
        }

        let key = match code {
            KeyCode::Up => RemoteKey::Up,
            KeyCode::Down => RemoteKey::Down,
            KeyCode::Left => RemoteKey::Left,
            KeyCode::Right => RemoteKey::Right,
            KeyCode::Enter => RemoteKey::Select,
            KeyCode::Backspace | KeyCode::Esc => RemoteKey::Back,
            KeyCode::Home => RemoteKey::Home,
            KeyCode::Char(c) => match c {
                'h' => RemoteKey::Home,
                'c' => RemoteKey::ContextMenu,
                'i' => RemoteKey::Info,
                ' ' => RemoteKey::PlayPause,
                'x' => RemoteKey::Stop,
                '+' | '=' => RemoteKey::VolumeUp,
                '-' => RemoteKey::VolumeDown,
                'm' => RemoteKey::Mute,
                'o' => RemoteKey::Osd,
                '.' | '>' => RemoteKey::SkipNext,
                ',' | '<' => RemoteKey::SkipPrevious,
                'f' => RemoteKey::FastForward,
                'r' => RemoteKey::Rewind,
                'q' => RemoteKey::Quit,
                _ => return None,
            },
            _ => return None,
        };
        Some(key)
    }

    /// Name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            RemoteKey::Up => "up",
            RemoteKey::Down => "down",
            RemoteKey::Left => "left",
            RemoteKey::Right => "right",
            RemoteKey::Select => "select",
            RemoteKey::Back => "back",
            RemoteKey::Home => "home",
            RemoteKey::ContextMenu => "menu",
            RemoteKey::Info => "info",
            RemoteKey::PlayPause => "playpause",
            RemoteKey::Stop => "stop",
            RemoteKey::VolumeUp => "volumeup",
            RemoteKey::VolumeDown => "volumedown",
            RemoteKey::Mute => "mute",
            RemoteKey::Osd => "osd",
            RemoteKey::SkipNext => "next",
            RemoteKey::SkipPrevious => "previous",
            RemoteKey::FastForward => "fastforward",
            RemoteKey::Rewind => "rewind",
            RemoteKey::Quit => "quit",
        }
    }

    /// `Input.ExecuteAction` action, if the key is sent that way
    pub fn action(&self) -> Option<&'static str> {
        let action = match self {
            RemoteKey::Up => "up",
            RemoteKey::Down => "down",
            RemoteKey::Left => "left",
            RemoteKey::Right => "right",
            RemoteKey::Select => "select",
            RemoteKey::Back => "back",
            RemoteKey::ContextMenu => "contextmenu",
            RemoteKey::Info => "info",
            RemoteKey::PlayPause => "playpause",
            RemoteKey::Stop => "stop",
            RemoteKey::VolumeUp => "volumeup",
            RemoteKey::VolumeDown => "volumedown",
            RemoteKey::Mute => "mute",
            RemoteKey::Osd => "osd",
            RemoteKey::SkipNext => "skipnext",
            RemoteKey::SkipPrevious => "skipprevious",
            RemoteKey::FastForward => "fastforward",
            RemoteKey::Rewind => "rewind",
            RemoteKey::Home | RemoteKey::Quit => return None,
        };
        Some(action)
    }

    /// Keyboard-map button name for the event server
    pub fn button(&self) -> Option<&'static str> {
        let button = match self {
            RemoteKey::Up => "up",
            RemoteKey::Down => "down",
            RemoteKey::Left => "left",
            RemoteKey::Right => "right",
            RemoteKey::Select => "return",
            RemoteKey::Back => "backspace",
            RemoteKey::ContextMenu => "c",
            RemoteKey::Info => "i",
            RemoteKey::PlayPause => "space",
            RemoteKey::Stop => "x",
            RemoteKey::VolumeUp => "plus",
            RemoteKey::VolumeDown => "minus",
            RemoteKey::Mute => "f8",
            RemoteKey::Osd => "m",
            RemoteKey::SkipNext => "period",
            RemoteKey::SkipPrevious => "comma",
            RemoteKey::FastForward => "f",
            RemoteKey::Rewind => "r",
            RemoteKey::Home | RemoteKey::Quit => return None,
        };
        Some(button)
    }
}

impl FromStr for RemoteKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_lowercase();
        RemoteKey::SENDABLE
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = RemoteKey::SENDABLE.iter().map(|k| k.name()).collect();
                anyhow!("Unknown key '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Send `key` over JSON-RPC; `done` receives the outcome on the connection's executor
fn send_rpc<F>(conn: &Connection, key: RemoteKey, done: F)
where
    F: FnOnce(Result<(), CallError>) + Send + 'static,
{
    match key.action() {
        Some(action) => {
            conn.call::<ExecuteAction, _>(
                ActionParams {
                    action: action.to_string(),
                },
                move |outcome| done(outcome.map(|_| ())),
            );
        }
        None if key == RemoteKey::Home => {
            conn.call_raw("Input.Home", Value::Null, move |outcome| {
                done(outcome.map(|_| ()))
            });
        }
        None => {}
    }
}

/// Send a single key and wait for the host to acknowledge it
pub async fn key_command(config: ClientConfig, host: Option<&str>, name: &str) -> Result<()> {
    let key: RemoteKey = name.parse()?;
    let session = Session::new(config, host, SerialExecutor::spawn())?;
    let conn = session.connect().await?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    send_rpc(&conn, key, move |outcome| {
        let _ = tx.send(outcome);
    });
    let outcome = rx.await.unwrap_or(Err(CallError::Cancelled));
    session.close().await;

    outcome.with_context(|| format!("Key {} was not accepted", key.name()))?;
    print_success(&format!("Sent {}", key.name()));
    Ok(())
}

/// Restores the terminal even on early return
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("Failed to enter raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Interactive remote until `q` or Ctrl+C
pub async fn remote_command(config: ClientConfig, host: Option<&str>, event_server: bool) -> Result<()> {
    use crossterm::event::{self, Event, KeyEvent, KeyEventKind};

    let session = Session::new(config, host, SerialExecutor::spawn())?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    for role in [ObserverRole::Player, ObserverRole::Application] {
        let lines = line_tx.clone();
        session.manager.register_observer(
            role,
            observer_fn(move |event| {
                let _ = lines.send(format_event(event));
            }),
        );
    }

    session.connect().await?;

    let cancel = CancellationToken::new();
    let control = if event_server {
        let channel = ControlChannel::open(&session.host, &session.config.event_server.device_name)
            .await
            .context("Failed to open event-server channel")?;
        let channel = Arc::new(channel);
        channel.spawn_keepalive(session.config.event_server.keepalive_interval, cancel.clone());
        Some(channel)
    } else {
        None
    };

    print_info(&format!("Remote for {}", session.host.name));
    println!("{}", HELP);

    let guard = RawModeGuard::enable()?;
    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(64);

    let reader_stop = stop.clone();
    let reader = tokio::task::spawn_blocking(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            if event::poll(std::time::Duration::from_millis(20)).unwrap_or(false) {
                if let Ok(evt) = event::read() {
                    if event_tx.blocking_send(evt).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            Some(evt) = event_rx.recv() => {
                let Event::Key(KeyEvent { code, modifiers, kind, .. }) = evt else {
                    continue;
                };
                if kind == KeyEventKind::Release {
                    continue;
                }
                let key = match RemoteKey::from_key(code, modifiers) {
                    Some(RemoteKey::Quit) => break,
                    Some(key) => key,
                    None => continue,
                };

                if let (Some(channel), Some(button)) = (control.as_ref(), key.button()) {
                    match channel.button_press(KEYBOARD_MAP, button) {
                        Ok(()) => continue,
                        Err(e) => tracing::warn!("Event server send failed, using JSON-RPC: {}", e),
                    }
                }

                match session.manager.current().await {
                    Some(conn) => {
                        let lines = line_tx.clone();
                        send_rpc(&conn, key, move |outcome| {
                            if let Err(e) = outcome {
                                let _ = lines.send(format!("{} failed: {}", key.name(), e));
                            }
                        });
                    }
                    None => {
                        let _ = write!(stdout, "not connected, {} dropped\r\n", key.name());
                    }
                }
            }
            Some(line) = line_rx.recv() => {
                let _ = write!(stdout, "{}\r\n", line);
                let _ = stdout.flush();
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    drop(guard);
    let _ = reader.await;

    cancel.cancel();
    if let Some(channel) = control {
        channel.close();
    }
    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        let none = KeyModifiers::NONE;
        assert_eq!(RemoteKey::from_key(KeyCode::Up, none), Some(RemoteKey::Up));
        assert_eq!(RemoteKey::from_key(KeyCode::Enter, none), Some(RemoteKey::Select));
        assert_eq!(RemoteKey::from_key(KeyCode::Esc, none), Some(RemoteKey::Back));
        assert_eq!(
            RemoteKey::from_key(KeyCode::Char(' '), none),
            Some(RemoteKey::PlayPause)
        );
        assert_eq!(RemoteKey::from_key(KeyCode::Char('q'), none), Some(RemoteKey::Quit));
        assert_eq!(
            RemoteKey::from_key(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(RemoteKey::Quit)
        );
        assert_eq!(RemoteKey::from_key(KeyCode::Char('z'), none), None);
        assert_eq!(RemoteKey::from_key(KeyCode::F(5), none), None);
    }

    #[test]
    fn test_every_sendable_key_has_a_route() {
        for key in RemoteKey::SENDABLE {
            assert!(
                key.action().is_some() || key == RemoteKey::Home,
                "{:?} has no action",
                key
            );
            assert_eq!(key.name().parse::<RemoteKey>().unwrap(), key);
        }
        assert!(RemoteKey::Quit.action().is_none());
        assert!("quit".parse::<RemoteKey>().is_err());
    }

    #[test]
    fn test_buttons() {
        assert_eq!(RemoteKey::Select.button(), Some("return"));
        assert_eq!(RemoteKey::Back.button(), Some("backspace"));
        assert_eq!(RemoteKey::Home.button(), None);
    }
}
