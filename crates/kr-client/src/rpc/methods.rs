//! Typed host methods
//!
//! Only the methods the client itself needs are modelled here: state queries
//! for polling and reconnect refresh, and a handful of playback and input
//! commands. Anything else goes through `call_raw`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use kr_protocol::{MediaItem, MediaTime};

/// A host method with typed params and result
pub trait ApiMethod {
    /// Wire method name, e.g. `Player.GetActivePlayers`
    const NAME: &'static str;
    type Params: Serialize + Send + 'static;
    type Output: DeserializeOwned + Send + 'static;
}

/// Declare a method type
macro_rules! api_method {
    ($(#[$meta:meta])* $ty:ident, $name:literal, $params:ty => $output:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl ApiMethod for $ty {
            const NAME: &'static str = $name;
            type Params = $params;
            type Output = $output;
        }
    };
}

/// Properties requested for the active player
pub const PLAYER_PROPERTIES: &[&str] = &["speed", "time", "totaltime", "type"];

/// Properties requested for the playing item
pub const ITEM_PROPERTIES: &[&str] = &["title"];

/// Application properties requested for snapshots
pub const APPLICATION_PROPERTIES: &[&str] = &["volume", "muted"];

#[derive(Debug, Clone, Serialize)]
pub struct PlayerId {
    #[serde(rename = "playerid")]
    pub player_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerQuery {
    #[serde(rename = "playerid")]
    pub player_id: i64,
    pub properties: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyQuery {
    pub properties: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionParams {
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendTextParams {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeParams {
    pub volume: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MuteParams {
    pub mute: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationParams {
    pub title: String,
    pub message: String,
}

/// Entry of `Player.GetActivePlayers`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivePlayer {
    #[serde(rename = "playerid")]
    pub player_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Result of `Player.GetProperties`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerProperties {
    #[serde(default)]
    pub speed: i32,
    #[serde(default)]
    pub time: Option<MediaTime>,
    #[serde(default)]
    pub totaltime: Option<MediaTime>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Result of `Player.GetItem`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerItem {
    #[serde(default)]
    pub item: MediaItem,
}

/// Result of `Application.GetProperties`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ApplicationProperties {
    pub volume: u32,
    pub muted: bool,
}

/// Result of `Player.PlayPause`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PlayerSpeed {
    pub speed: i32,
}

api_method!(
    /// Liveness check, answers `"pong"`
    Ping, "JSONRPC.Ping", () => String
);
api_method!(GetActivePlayers, "Player.GetActivePlayers", () => Vec<ActivePlayer>);
api_method!(GetPlayerProperties, "Player.GetProperties", PlayerQuery => PlayerProperties);
api_method!(GetPlayerItem, "Player.GetItem", PlayerQuery => PlayerItem);
api_method!(
    GetApplicationProperties,
    "Application.GetProperties",
    PropertyQuery => ApplicationProperties
);
api_method!(PlayPause, "Player.PlayPause", PlayerId => PlayerSpeed);
api_method!(Stop, "Player.Stop", PlayerId => String);
api_method!(
    /// Run a named action (`play`, `back`, `osd`, ...)
    ExecuteAction, "Input.ExecuteAction", ActionParams => String
);
api_method!(
    /// Fill the host's open text dialog
    SendText, "Input.SendText", SendTextParams => String
);
api_method!(SetVolume, "Application.SetVolume", VolumeParams => u32);
api_method!(SetMute, "Application.SetMute", MuteParams => bool);
api_method!(ShowNotification, "GUI.ShowNotification", NotificationParams => String);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_params_serialize_to_null() {
        assert_eq!(serde_json::to_value(()).unwrap(), serde_json::Value::Null);
        assert_eq!(<Ping as ApiMethod>::NAME, "JSONRPC.Ping");
    }

    #[test]
    fn test_player_query_shape() {
        let params = PlayerQuery {
            player_id: 1,
            properties: PLAYER_PROPERTIES,
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"playerid": 1, "properties": ["speed", "time", "totaltime", "type"]})
        );
    }

    #[test]
    fn test_player_properties_decode() {
        let props: PlayerProperties = serde_json::from_value(json!({
            "speed": 1,
            "time": {"hours": 0, "minutes": 1, "seconds": 5, "milliseconds": 0},
            "totaltime": {"hours": 0, "minutes": 3, "seconds": 30, "milliseconds": 0},
            "type": "audio"
        }))
        .unwrap();
        assert_eq!(props.speed, 1);
        assert_eq!(props.time.unwrap().seconds, 5);
        assert_eq!(props.kind.as_deref(), Some("audio"));
    }

    #[test]
    fn test_active_players_decode() {
        let players: Vec<ActivePlayer> =
            serde_json::from_value(json!([{"playerid": 0, "type": "audio"}])).unwrap();
        assert_eq!(
            players,
            vec![ActivePlayer {
                player_id: 0,
                kind: "audio".to_string()
            }]
        );
    }
}
