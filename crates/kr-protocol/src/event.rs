//! Typed notification events
//!
//! Unsolicited host notifications (`Player.OnPlay`, `Application.OnVolumeChanged`, ...)
//! are parsed into a closed [`NotificationEvent`] union. Every event belongs to
//! exactly one [`ObserverRole`]; observers subscribe per role.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Category of host state that observers subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverRole {
    Player,
    Application,
    Playlist,
    Input,
    System,
}

impl ObserverRole {
    /// Every role, in a stable order
    pub const ALL: [ObserverRole; 5] = [
        ObserverRole::Player,
        ObserverRole::Application,
        ObserverRole::Playlist,
        ObserverRole::Input,
        ObserverRole::System,
    ];

    /// Role owning a notification method (`Player.OnPlay` -> `Player`)
    pub fn from_method(method: &str) -> Option<Self> {
        match method.split('.').next()? {
            "Player" => Some(ObserverRole::Player),
            "Application" => Some(ObserverRole::Application),
            "Playlist" => Some(ObserverRole::Playlist),
            "Input" => Some(ObserverRole::Input),
            "System" => Some(ObserverRole::System),
            _ => None,
        }
    }
}

impl fmt::Display for ObserverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverRole::Player => write!(f, "player"),
            ObserverRole::Application => write!(f, "application"),
            ObserverRole::Playlist => write!(f, "playlist"),
            ObserverRole::Input => write!(f, "input"),
            ObserverRole::System => write!(f, "system"),
        }
    }
}

/// Playback position or length as reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTime {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
    #[serde(default)]
    pub milliseconds: u32,
}

impl MediaTime {
    /// Build from a duration, truncated to milliseconds
    pub fn from_duration(duration: Duration) -> Self {
        let total = duration.as_millis() as u64;
        Self {
            hours: (total / 3_600_000) as u32,
            minutes: ((total / 60_000) % 60) as u32,
            seconds: ((total / 1000) % 60) as u32,
            milliseconds: (total % 1000) as u32,
        }
    }

    /// Convert to a duration
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(
            self.hours as u64 * 3_600_000
                + self.minutes as u64 * 60_000
                + self.seconds as u64 * 1000
                + self.milliseconds as u64,
        )
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours > 0 {
            write!(f, "{}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
        } else {
            write!(f, "{}:{:02}", self.minutes, self.seconds)
        }
    }
}

/// Library item referenced by player and playlist events
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaItem {
    /// Item type (`song`, `movie`, `episode`, ...)
    #[serde(rename = "type", default = "unknown_kind")]
    pub kind: String,
    /// Library id, absent for files outside the library
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn unknown_kind() -> String {
    "unknown".to_string()
}

impl MediaItem {
    /// Best human-readable name for the item
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.label.as_deref())
            .unwrap_or(&self.kind)
    }
}

/// Player reference attached to player notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    #[serde(rename = "playerid")]
    pub player_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<i32>,
}

/// Aggregate "currently playing" state for one active player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: i64,
    /// Player kind (`audio`, `video`, `picture`)
    pub kind: String,
    /// Playback speed, 0 when paused
    pub speed: i32,
    pub item: Option<MediaItem>,
    pub position: Option<MediaTime>,
    pub duration: Option<MediaTime>,
}

impl PlayerSnapshot {
    /// Whether playback is paused
    pub fn is_paused(&self) -> bool {
        self.speed == 0
    }
}

/// Player notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Play { item: MediaItem, player: PlayerRef },
    Pause { item: MediaItem, player: PlayerRef },
    Resume { item: MediaItem, player: PlayerRef },
    Stop { item: MediaItem, ended: bool },
    Seek { player: PlayerRef, position: Option<MediaTime> },
    SpeedChanged { player: PlayerRef },
    PropertyChanged { player: PlayerRef, property: Value },
    AvStart { item: MediaItem, player: PlayerRef },
    /// Full state, synthesized after (re)connect or for late observers
    NowPlaying(PlayerSnapshot),
    /// No active player
    NothingPlaying,
}

/// Application notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationEvent {
    VolumeChanged { volume: u32, muted: bool },
}

/// Playlist notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEvent {
    Add {
        playlist_id: i64,
        item: MediaItem,
        position: Option<i64>,
    },
    Remove {
        playlist_id: i64,
        position: Option<i64>,
    },
    Clear {
        playlist_id: i64,
    },
}

/// Input notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// The host is showing a text entry dialog
    InputRequested {
        title: String,
        kind: String,
        value: String,
    },
    InputFinished,
}

/// System notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Quit,
    Restart,
    Sleep,
    Wake,
    LowBattery,
}

/// A typed notification delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Player(PlayerEvent),
    Application(ApplicationEvent),
    Playlist(PlaylistEvent),
    Input(InputEvent),
    System(SystemEvent),
    /// Nothing has been observed for this role yet
    NoResultsYet(ObserverRole),
    /// The connection went away; cached state for the role is gone
    ConnectionLost { role: ObserverRole, reason: String },
}

#[derive(Deserialize)]
struct PlayerData {
    #[serde(default)]
    item: MediaItem,
    player: PlayerRef,
}

#[derive(Deserialize)]
struct StopData {
    #[serde(default)]
    item: MediaItem,
    #[serde(default)]
    end: bool,
}

#[derive(Deserialize)]
struct SeekPlayer {
    #[serde(rename = "playerid")]
    player_id: i64,
    #[serde(default)]
    speed: Option<i32>,
    #[serde(default)]
    time: Option<MediaTime>,
}

#[derive(Deserialize)]
struct SeekData {
    player: SeekPlayer,
}

#[derive(Deserialize)]
struct PropertyData {
    player: PlayerRef,
    #[serde(default)]
    property: Value,
}

#[derive(Deserialize)]
struct VolumeData {
    volume: u32,
    #[serde(default)]
    muted: bool,
}

#[derive(Deserialize)]
struct PlaylistData {
    #[serde(rename = "playlistid")]
    playlist_id: i64,
    #[serde(default)]
    item: MediaItem,
    #[serde(default)]
    position: Option<i64>,
}

#[derive(Deserialize)]
struct InputData {
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    value: String,
}

impl NotificationEvent {
    /// Role this event is delivered to
    pub fn role(&self) -> ObserverRole {
        match self {
            NotificationEvent::Player(_) => ObserverRole::Player,
            NotificationEvent::Application(_) => ObserverRole::Application,
            NotificationEvent::Playlist(_) => ObserverRole::Playlist,
            NotificationEvent::Input(_) => ObserverRole::Input,
            NotificationEvent::System(_) => ObserverRole::System,
            NotificationEvent::NoResultsYet(role) => *role,
            NotificationEvent::ConnectionLost { role, .. } => *role,
        }
    }

    /// Parse a notification envelope.
    ///
    /// Returns `Ok(None)` for methods this client does not model.
    pub fn from_notification(method: &str, params: &Value) -> Result<Option<Self>, CodecError> {
        let data = params.get("data").cloned().unwrap_or(Value::Null);

        let event = match method {
            "Player.OnPlay" => {
                let d: PlayerData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::Play {
                    item: d.item,
                    player: d.player,
                })
            }
            "Player.OnPause" => {
                let d: PlayerData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::Pause {
                    item: d.item,
                    player: d.player,
                })
            }
            "Player.OnResume" => {
                let d: PlayerData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::Resume {
                    item: d.item,
                    player: d.player,
                })
            }
            "Player.OnAVStart" => {
                let d: PlayerData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::AvStart {
                    item: d.item,
                    player: d.player,
                })
            }
            "Player.OnStop" => {
                let d: StopData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::Stop {
                    item: d.item,
                    ended: d.end,
                })
            }
            "Player.OnSeek" => {
                let d: SeekData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::Seek {
                    player: PlayerRef {
                        player_id: d.player.player_id,
                        speed: d.player.speed,
                    },
                    position: d.player.time,
                })
            }
            "Player.OnSpeedChanged" => {
                let d: PlayerData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::SpeedChanged { player: d.player })
            }
            "Player.OnPropertyChanged" => {
                let d: PropertyData = serde_json::from_value(data)?;
                NotificationEvent::Player(PlayerEvent::PropertyChanged {
                    player: d.player,
                    property: d.property,
                })
            }
            "Application.OnVolumeChanged" => {
                let d: VolumeData = serde_json::from_value(data)?;
                NotificationEvent::Application(ApplicationEvent::VolumeChanged {
                    volume: d.volume,
                    muted: d.muted,
                })
            }
            "Playlist.OnAdd" => {
                let d: PlaylistData = serde_json::from_value(data)?;
                NotificationEvent::Playlist(PlaylistEvent::Add {
                    playlist_id: d.playlist_id,
                    item: d.item,
                    position: d.position,
                })
            }
            "Playlist.OnRemove" => {
                let d: PlaylistData = serde_json::from_value(data)?;
                NotificationEvent::Playlist(PlaylistEvent::Remove {
                    playlist_id: d.playlist_id,
                    position: d.position,
                })
            }
            "Playlist.OnClear" => {
                let d: PlaylistData = serde_json::from_value(data)?;
                NotificationEvent::Playlist(PlaylistEvent::Clear {
                    playlist_id: d.playlist_id,
                })
            }
            "Input.OnInputRequested" => {
                let d: InputData = serde_json::from_value(data)?;
                NotificationEvent::Input(InputEvent::InputRequested {
                    title: d.title,
                    kind: d.kind,
                    value: d.value,
                })
            }
            "Input.OnInputFinished" => NotificationEvent::Input(InputEvent::InputFinished),
            "System.OnQuit" => NotificationEvent::System(SystemEvent::Quit),
            "System.OnRestart" => NotificationEvent::System(SystemEvent::Restart),
            "System.OnSleep" => NotificationEvent::System(SystemEvent::Sleep),
            "System.OnWake" => NotificationEvent::System(SystemEvent::Wake),
            "System.OnLowBattery" => NotificationEvent::System(SystemEvent::LowBattery),
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}
