//! Aggregate host state: cache folding and snapshot diffs

use std::time::Duration;

use kr_protocol::{
    ApplicationEvent, MediaItem, NotificationEvent, PlayerEvent, PlayerRef, PlayerSnapshot,
};

/// Position drift beyond the expected advance that counts as a seek
pub const SEEK_TOLERANCE: Duration = Duration::from_secs(2);

/// Volume and mute state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationSnapshot {
    pub volume: u32,
    pub muted: bool,
}

/// Result of a full state query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSnapshot {
    /// Active player, if anything is playing
    pub player: Option<PlayerSnapshot>,
    pub application: Option<ApplicationSnapshot>,
}

/// Player kind implied by an item type
fn player_kind(item: &MediaItem) -> &'static str {
    match item.kind.as_str() {
        "song" => "audio",
        "picture" => "picture",
        _ => "video",
    }
}

fn current_player(cached: &Option<NotificationEvent>) -> Option<&PlayerSnapshot> {
    match cached {
        Some(NotificationEvent::Player(PlayerEvent::NowPlaying(snapshot))) => Some(snapshot),
        _ => None,
    }
}

fn started(item: &MediaItem, player: &PlayerRef, speed: i32) -> PlayerSnapshot {
    PlayerSnapshot {
        player_id: player.player_id,
        kind: player_kind(item).to_string(),
        speed,
        item: Some(item.clone()),
        position: None,
        duration: None,
    }
}

fn now_playing(snapshot: PlayerSnapshot) -> Option<NotificationEvent> {
    Some(NotificationEvent::Player(PlayerEvent::NowPlaying(snapshot)))
}

/// Fold an event into a role's cached state.
///
/// Player events collapse into `NowPlaying` / `NothingPlaying`, volume
/// changes replace the application state, and other roles keep the latest
/// event.
pub fn fold(cached: Option<NotificationEvent>, event: &NotificationEvent) -> Option<NotificationEvent> {
    match event {
        NotificationEvent::Player(player_event) => fold_player(cached, player_event),
        NotificationEvent::NoResultsYet(_) => cached,
        NotificationEvent::ConnectionLost { .. } => None,
        other => Some(other.clone()),
    }
}

fn fold_player(cached: Option<NotificationEvent>, event: &PlayerEvent) -> Option<NotificationEvent> {
    let current = current_player(&cached).cloned();

    match event {
        PlayerEvent::Play { item, player } | PlayerEvent::AvStart { item, player } => {
            let mut snapshot = started(item, player, player.speed.unwrap_or(1));
            if let Some(prev) = current.filter(|p| p.item.as_ref() == Some(item)) {
                snapshot.kind = prev.kind;
                snapshot.position = prev.position;
                snapshot.duration = prev.duration;
            }
            now_playing(snapshot)
        }
        PlayerEvent::Pause { item, player } => {
            let mut snapshot = current.unwrap_or_else(|| started(item, player, 0));
            snapshot.speed = 0;
            now_playing(snapshot)
        }
        PlayerEvent::Resume { item, player } => {
            let speed = player.speed.filter(|s| *s != 0).unwrap_or(1);
            let mut snapshot = current.unwrap_or_else(|| started(item, player, speed));
            snapshot.speed = speed;
            now_playing(snapshot)
        }
        PlayerEvent::Stop { .. } | PlayerEvent::NothingPlaying => {
            Some(NotificationEvent::Player(PlayerEvent::NothingPlaying))
        }
        PlayerEvent::Seek { position, .. } => match current {
            Some(mut snapshot) => {
                if position.is_some() {
                    snapshot.position = *position;
                }
                now_playing(snapshot)
            }
            None => cached,
        },
        PlayerEvent::SpeedChanged { player } => match current {
            Some(mut snapshot) => {
                if let Some(speed) = player.speed {
                    snapshot.speed = speed;
                }
                now_playing(snapshot)
            }
            None => cached,
        },
        PlayerEvent::PropertyChanged { .. } => cached,
        PlayerEvent::NowPlaying(snapshot) => now_playing(snapshot.clone()),
    }
}

/// Events describing a snapshot in full
pub fn snapshot_events(snapshot: &HostSnapshot) -> Vec<NotificationEvent> {
    let mut events = Vec::with_capacity(2);

    events.push(NotificationEvent::Player(match &snapshot.player {
        Some(player) => PlayerEvent::NowPlaying(player.clone()),
        None => PlayerEvent::NothingPlaying,
    }));

    if let Some(app) = snapshot.application {
        events.push(volume_event(app));
    }
    events
}

fn volume_event(app: ApplicationSnapshot) -> NotificationEvent {
    NotificationEvent::Application(ApplicationEvent::VolumeChanged {
        volume: app.volume,
        muted: app.muted,
    })
}

fn player_ref(snapshot: &PlayerSnapshot) -> PlayerRef {
    PlayerRef {
        player_id: snapshot.player_id,
        speed: Some(snapshot.speed),
    }
}

fn item_of(snapshot: &PlayerSnapshot) -> MediaItem {
    snapshot.item.clone().unwrap_or_default()
}

/// Minimal set of events turning `prev` into `next`.
///
/// `elapsed` is the time between the two queries and is used to tell normal
/// playback progress from a seek. Without a previous snapshot the new one is
/// described in full.
pub fn diff_snapshots(
    prev: Option<&HostSnapshot>,
    next: &HostSnapshot,
    elapsed: Duration,
) -> Vec<NotificationEvent> {
    let prev = match prev {
        Some(prev) => prev,
        None => return snapshot_events(next),
    };

    let mut events = Vec::new();

    match (&prev.player, &next.player) {
        (None, None) => {}
        (Some(old), None) => {
            events.push(NotificationEvent::Player(PlayerEvent::Stop {
                item: item_of(old),
                ended: false,
            }));
        }
        (None, Some(new)) => {
            events.push(NotificationEvent::Player(start_event(new)));
        }
        (Some(old), Some(new)) => diff_player(old, new, elapsed, &mut events),
    }

    match (prev.application, next.application) {
        (Some(old), Some(new)) if old == new => {}
        (_, Some(new)) => events.push(volume_event(new)),
        (_, None) => {}
    }

    events
}

fn start_event(snapshot: &PlayerSnapshot) -> PlayerEvent {
    if snapshot.is_paused() {
        PlayerEvent::Pause {
            item: item_of(snapshot),
            player: player_ref(snapshot),
        }
    } else {
        PlayerEvent::Play {
            item: item_of(snapshot),
            player: player_ref(snapshot),
        }
    }
}

fn diff_player(
    old: &PlayerSnapshot,
    new: &PlayerSnapshot,
    elapsed: Duration,
    events: &mut Vec<NotificationEvent>,
) {
    if old.player_id != new.player_id || old.item != new.item {
        events.push(NotificationEvent::Player(start_event(new)));
        return;
    }

    let item = item_of(new);
    let player = player_ref(new);

    if old.speed != new.speed {
        let event = match (old.is_paused(), new.is_paused()) {
            (false, true) => PlayerEvent::Pause { item, player },
            (true, false) => PlayerEvent::Resume { item, player },
            _ => PlayerEvent::SpeedChanged { player },
        };
        events.push(NotificationEvent::Player(event));
        // Position estimate is meaningless across a speed change
        return;
    }

    if let (Some(before), Some(after)) = (old.position, new.position) {
        let expected =
            before.as_duration().as_millis() as i128 + elapsed.as_millis() as i128 * old.speed as i128;
        let actual = after.as_duration().as_millis() as i128;

        if (actual - expected).unsigned_abs() > SEEK_TOLERANCE.as_millis() as u128 {
            events.push(NotificationEvent::Player(PlayerEvent::Seek {
                player,
                position: Some(after),
            }));
        }
    }
}
