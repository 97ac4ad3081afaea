//! Output formatting utilities for the CLI
//!
//! Tables for hosts and host state, one-line renderings of notifications,
//! and colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use kr_client::HostSnapshot;
use kr_core::{ConnectionStatus, HostDescriptor};
use kr_protocol::{
    ApplicationEvent, InputEvent, MediaItem, NotificationEvent, PlayerEvent, PlaylistEvent,
    SystemEvent,
};

/// Format the configured hosts as a table, marking the default one
pub fn format_hosts(hosts: &[HostDescriptor], default: Option<&str>) -> String {
    if hosts.is_empty() {
        return "No hosts configured".to_string();
    }

    #[derive(Tabled)]
    struct HostRow {
        #[tabled(rename = "")]
        marker: &'static str,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "MODE")]
        mode: String,
        #[tabled(rename = "PORTS (tcp/http/udp)")]
        ports: String,
        #[tabled(rename = "AUTH")]
        auth: String,
    }

    let default = default.or_else(|| hosts.first().map(|h| h.name.as_str()));
    let rows: Vec<HostRow> = hosts
        .iter()
        .map(|h| HostRow {
            marker: if Some(h.name.as_str()) == default { "*" } else { "" },
            name: h.name.clone(),
            address: h.address.clone(),
            mode: h.mode.to_string(),
            ports: format!("{}/{}/{}", h.tcp_port, h.http_port, h.event_server_port),
            auth: h.username.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a host state snapshot as a two-column table
pub fn format_snapshot(host: &HostDescriptor, status: ConnectionStatus, snapshot: &HostSnapshot) -> String {
    #[derive(Tabled)]
    struct Field {
        #[tabled(rename = "FIELD")]
        name: &'static str,
        #[tabled(rename = "VALUE")]
        value: String,
    }

    let mut rows = vec![
        Field {
            name: "Host",
            value: format!("{} ({})", host.name, host.address),
        },
        Field {
            name: "Transport",
            value: host.mode.to_string(),
        },
        Field {
            name: "Connection",
            value: status.to_string(),
        },
    ];

    match &snapshot.player {
        Some(player) => {
            let state = if player.is_paused() {
                "paused".to_string()
            } else if player.speed == 1 {
                "playing".to_string()
            } else {
                format!("playing ({}x)", player.speed)
            };
            rows.push(Field {
                name: "Player",
                value: format!("{} #{} {}", player.kind, player.player_id, state),
            });
            rows.push(Field {
                name: "Item",
                value: player
                    .item
                    .as_ref()
                    .map(describe_item)
                    .unwrap_or_else(|| "-".to_string()),
            });
            let position = player.position.map(|p| p.to_string());
            let duration = player.duration.map(|d| d.to_string());
            rows.push(Field {
                name: "Position",
                value: match (position, duration) {
                    (Some(p), Some(d)) => format!("{} / {}", p, d),
                    (Some(p), None) => p,
                    _ => "-".to_string(),
                },
            });
        }
        None => rows.push(Field {
            name: "Player",
            value: "nothing playing".to_string(),
        }),
    }

    if let Some(app) = snapshot.application {
        rows.push(Field {
            name: "Volume",
            value: if app.muted {
                format!("{} (muted)", app.volume)
            } else {
                app.volume.to_string()
            },
        });
    }

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

fn describe_item(item: &MediaItem) -> String {
    let name = truncate(item.display_name(), 60);
    match item.id {
        Some(id) => format!("{} [{} {}]", name, item.kind, id),
        None => format!("{} [{}]", name, item.kind),
    }
}

/// One-line rendering of a notification
pub fn format_event(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::Player(player) => match player {
            PlayerEvent::Play { item, .. } => format!("player: play {}", describe_item(item)),
            PlayerEvent::Pause { item, .. } => format!("player: pause {}", describe_item(item)),
            PlayerEvent::Resume { item, .. } => format!("player: resume {}", describe_item(item)),
            PlayerEvent::AvStart { item, .. } => format!("player: started {}", describe_item(item)),
            PlayerEvent::Stop { item, ended } => format!(
                "player: stop {}{}",
                describe_item(item),
                if *ended { " (ended)" } else { "" }
            ),
            PlayerEvent::Seek { position, .. } => match position {
                Some(p) => format!("player: seek to {}", p),
                None => "player: seek".to_string(),
            },
            PlayerEvent::SpeedChanged { player } => match player.speed {
                Some(speed) => format!("player: speed {}x", speed),
                None => "player: speed changed".to_string(),
            },
            PlayerEvent::PropertyChanged { property, .. } => {
                format!("player: property changed {}", property)
            }
            PlayerEvent::NowPlaying(snapshot) => {
                let item = snapshot
                    .item
                    .as_ref()
                    .map(describe_item)
                    .unwrap_or_else(|| snapshot.kind.clone());
                if snapshot.is_paused() {
                    format!("player: paused on {}", item)
                } else {
                    format!("player: now playing {}", item)
                }
            }
            PlayerEvent::NothingPlaying => "player: nothing playing".to_string(),
        },
        NotificationEvent::Application(ApplicationEvent::VolumeChanged { volume, muted }) => {
            format!(
                "application: volume {}{}",
                volume,
                if *muted { " (muted)" } else { "" }
            )
        }
        NotificationEvent::Playlist(playlist) => match playlist {
            PlaylistEvent::Add {
                playlist_id, item, ..
            } => format!("playlist {}: added {}", playlist_id, describe_item(item)),
            PlaylistEvent::Remove {
                playlist_id,
                position,
            } => match position {
                Some(p) => format!("playlist {}: removed position {}", playlist_id, p),
                None => format!("playlist {}: removed item", playlist_id),
            },
            PlaylistEvent::Clear { playlist_id } => format!("playlist {}: cleared", playlist_id),
        },
        NotificationEvent::Input(InputEvent::InputRequested { title, kind, .. }) => {
            format!("input: {} requested ({})", kind, title)
        }
        NotificationEvent::Input(InputEvent::InputFinished) => "input: finished".to_string(),
        NotificationEvent::System(system) => {
            let what = match system {
                SystemEvent::Quit => "quit",
                SystemEvent::Restart => "restart",
                SystemEvent::Sleep => "sleep",
                SystemEvent::Wake => "wake",
                SystemEvent::LowBattery => "low battery",
            };
            format!("system: {}", what)
        }
        NotificationEvent::NoResultsYet(role) => format!("{}: no state yet", role),
        NotificationEvent::ConnectionLost { role, reason } => {
            format!("{}: connection lost ({})", role, reason)
        }
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kr_client::ApplicationSnapshot;
    use kr_core::TransportMode;
    use kr_protocol::{MediaTime, ObserverRole, PlayerRef, PlayerSnapshot};
    use std::time::Duration;

    fn movie() -> MediaItem {
        MediaItem {
            kind: "movie".to_string(),
            id: Some(42),
            title: Some("The Long Take".to_string()),
            label: None,
        }
    }

    #[test]
    fn test_format_hosts_marks_default() {
        let hosts = vec![
            HostDescriptor::new("den", "10.0.0.5"),
            HostDescriptor::new("bedroom", "10.0.0.6").with_mode(TransportMode::Polling),
        ];
        let table = format_hosts(&hosts, Some("bedroom"));
        let bedroom = table.lines().find(|l| l.contains("bedroom")).unwrap();
        assert!(bedroom.contains('*'));
        assert!(bedroom.contains("polling"));
        let den = table.lines().find(|l| l.contains("den")).unwrap();
        assert!(!den.contains('*'));

        assert_eq!(format_hosts(&[], None), "No hosts configured");
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = HostSnapshot {
            player: Some(PlayerSnapshot {
                player_id: 1,
                kind: "video".to_string(),
                speed: 0,
                item: Some(movie()),
                position: Some(MediaTime::from_duration(Duration::from_secs(65))),
                duration: Some(MediaTime::from_duration(Duration::from_secs(7200))),
            }),
            application: Some(ApplicationSnapshot {
                volume: 40,
                muted: true,
            }),
        };
        let host = HostDescriptor::new("den", "10.0.0.5");
        let table = format_snapshot(&host, ConnectionStatus::Connected, &snapshot);

        assert!(table.contains("video #1 paused"));
        assert!(table.contains("The Long Take [movie 42]"));
        assert!(table.contains("1:05 / 2:00:00"));
        assert!(table.contains("40 (muted)"));
        assert!(table.contains("connected"));
    }

    #[test]
    fn test_format_snapshot_idle() {
        let host = HostDescriptor::new("den", "10.0.0.5");
        let table = format_snapshot(&host, ConnectionStatus::Connected, &HostSnapshot::default());
        assert!(table.contains("nothing playing"));
    }

    #[test]
    fn test_format_event() {
        let play = NotificationEvent::Player(PlayerEvent::Play {
            item: movie(),
            player: PlayerRef {
                player_id: 1,
                speed: Some(1),
            },
        });
        assert_eq!(format_event(&play), "player: play The Long Take [movie 42]");

        let volume = NotificationEvent::Application(ApplicationEvent::VolumeChanged {
            volume: 12,
            muted: true,
        });
        assert_eq!(format_event(&volume), "application: volume 12 (muted)");

        let lost = NotificationEvent::ConnectionLost {
            role: ObserverRole::Player,
            reason: "reset".to_string(),
        };
        assert_eq!(format_event(&lost), "player: connection lost (reset)");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title", 10), "a very ...");
    }
}
