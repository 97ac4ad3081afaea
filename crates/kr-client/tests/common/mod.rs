//! Scripted host for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use kr_client::transport::memory::{HostEnd, HostRequest};
use kr_core::{ClientConfig, HostDescriptor, TransportMode};

/// What the scripted host reports from its state queries
#[derive(Debug, Clone)]
pub struct HostState {
    /// (item id, speed, position in seconds)
    pub player: Option<(i64, i32, u64)>,
    pub volume: u32,
    pub muted: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            player: None,
            volume: 50,
            muted: false,
        }
    }
}

fn media_time(secs: u64) -> Value {
    json!({
        "hours": secs / 3600,
        "minutes": (secs / 60) % 60,
        "seconds": secs % 60,
        "milliseconds": 0
    })
}

/// Host error for `method`, as a host with nothing playing reports it
fn refuse(method: &str, state: &HostState) -> Option<Value> {
    match method {
        "Player.GetItem" | "Player.GetProperties" if state.player.is_none() => {
            Some(json!({"code": -32100, "message": "no active player"}))
        }
        _ => None,
    }
}

/// Result for `method`, or `None` to leave the call unanswered
fn respond(method: &str, params: &Value, state: &mut HostState) -> Option<Value> {
    let result = match method {
        "JSONRPC.Ping" => json!("pong"),
        "Player.GetActivePlayers" => match state.player {
            Some(_) => json!([{"playerid": 0, "type": "audio"}]),
            None => json!([]),
        },
        "Player.GetProperties" => {
            let (_, speed, position) = state.player.unwrap_or((0, 0, 0));
            json!({
                "speed": speed,
                "time": media_time(position),
                "totaltime": media_time(240),
                "type": "audio"
            })
        }
        "Player.GetItem" => {
            let (id, _, _) = state.player.unwrap_or((0, 0, 0));
            json!({"item": {"type": "song", "id": id, "title": format!("Song {}", id), "label": format!("Song {}", id)}})
        }
        "Application.GetProperties" => json!({"volume": state.volume, "muted": state.muted}),
        "Application.SetVolume" => {
            state.volume = params["volume"].as_u64().unwrap_or(0) as u32;
            json!(state.volume)
        }
        "Player.PlayPause" => {
            let player = state.player.as_mut()?;
            player.1 = if player.1 == 0 { 1 } else { 0 };
            json!({"speed": player.1})
        }
        "Input.ExecuteAction" | "Input.SendText" | "GUI.ShowNotification" | "Player.Stop" => {
            json!("OK")
        }
        _ => return None,
    };
    Some(result)
}

enum Command {
    Push(String),
    HangUp,
}

enum Event {
    Request(Option<HostRequest>),
    Command(Option<Command>),
}

/// A host end driven by a background task
pub struct FakeHost {
    commands: mpsc::UnboundedSender<Command>,
    methods: Arc<Mutex<Vec<String>>>,
    pub state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn spawn(mut end: HostEnd, mode: TransportMode, state: HostState) -> Self {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let methods = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(state));

        let seen = methods.clone();
        let shared = state.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let event = tokio::select! {
                    request = end.recv() => Event::Request(request),
                    command = rx.recv() => Event::Command(command),
                };

                match event {
                    Event::Request(None) => break,
                    Event::Request(Some(request)) => {
                        let frame = request.json();
                        let method = frame["method"].as_str().unwrap_or_default().to_string();
                        seen.lock().unwrap().push(method.clone());

                        let reply = {
                            let mut state = shared.lock().unwrap();
                            match refuse(&method, &state) {
                                Some(error) => {
                                    Some(json!({"jsonrpc": "2.0", "id": frame["id"], "error": error}))
                                }
                                None => respond(&method, &frame["params"], &mut state).map(|result| {
                                    json!({"jsonrpc": "2.0", "id": frame["id"], "result": result})
                                }),
                            }
                        };
                        match reply {
                            Some(reply) => {
                                let reply = reply.to_string();
                                if mode.supports_push() {
                                    end.push(reply);
                                } else {
                                    request.reply(reply);
                                }
                            }
                            None => held.push(request),
                        }
                    }
                    Event::Command(Some(Command::Push(frame))) => {
                        end.push(frame);
                    }
                    Event::Command(Some(Command::HangUp)) | Event::Command(None) => {
                        end.hang_up();
                        break;
                    }
                }
            }
        });

        Self {
            commands,
            methods,
            state,
        }
    }

    /// Push a notification with `data` as its payload
    pub fn notify(&self, method: &str, data: Value) {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {"data": data, "sender": "xbmc"}
        });
        let _ = self.commands.send(Command::Push(frame.to_string()));
    }

    /// Push a raw frame
    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.commands.send(Command::Push(frame.into()));
    }

    /// Drop the connection from the host side
    pub fn hang_up(&self) {
        let _ = self.commands.send(Command::HangUp);
    }

    /// Methods received so far
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    pub fn set_player(&self, player: Option<(i64, i32, u64)>) {
        self.state.lock().unwrap().player = player;
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn den() -> HostDescriptor {
    HostDescriptor::new("den", "10.0.0.5")
}

pub fn bedroom() -> HostDescriptor {
    HostDescriptor::new("bedroom", "10.0.0.6")
}

/// Configuration with fast timers and both test hosts
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.hosts = vec![den(), bedroom()];
    config.polling_interval = Duration::from_millis(20);
    config.timeout_sweep_interval = Duration::from_millis(10);
    config.backoff.initial = Duration::from_millis(10);
    config.backoff.max = Duration::from_millis(50);
    config.backoff.jitter = 0.0;
    config
}
