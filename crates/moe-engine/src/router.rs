//! One vocabulary for every command origin.
//!
//! UI controls, hardware buttons, broadcast tokens and session callbacks all
//! end up as a [`Command`]; [`route`] turns that into the [`Action`] the engine
//! executes, so behaviour never depends on where a command came from.

use moe_proto::model::Library;
use moe_proto::protocol::{Command, KeyAction};
use thiserror::Error;

/// Hardware key codes understood on `MEDIA_BUTTON`.
pub mod keycode {
    pub const HEADSETHOOK: i32 = 79;
    pub const MEDIA_PLAY_PAUSE: i32 = 85;
    pub const MEDIA_STOP: i32 = 86;
    pub const MEDIA_NEXT: i32 = 87;
    pub const MEDIA_PREVIOUS: i32 = 88;
    pub const MEDIA_PLAY: i32 = 126;
    pub const MEDIA_PAUSE: i32 = 127;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("MEDIA_BUTTON needs a numeric key code")]
    MissingKeyCode,
}

/// What the engine actually does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Toggle,
    Play,
    Pause,
    Stop,
    ToggleFavorite,
    RequestUpdate,
    FadeOut,
    BecomingNoisy,
    AuthChanged,
    ChangeLibrary(Library),
    /// Switch library if the query names one, then make sure we are playing.
    PlayFromSearch(Option<Library>),
    ArmSleepTimer { minutes: u32 },
    CancelSleepTimer,
}

/// Parse a broadcast-style token.  `arg` carries the key code for `MEDIA_BUTTON`.
pub fn parse_token(token: &str, arg: Option<&str>) -> Result<Command, RouteError> {
    let cmd = match token {
        "PLAY_PAUSE" => Command::PlayPause,
        "PLAY" => Command::Play,
        "PAUSE" => Command::Pause,
        "STOP" => Command::Stop,
        "TOGGLE_FAVORITE" => Command::ToggleFavorite,
        "UPDATE" | "REQUEST_EVENT" => Command::Update,
        "TIMER_STOP" => Command::TimerStop,
        "AUDIO_BECOMING_NOISY" => Command::AudioBecomingNoisy,
        "AUTH_STATE_CHANGED" => Command::AuthStateChanged,
        "MEDIA_BUTTON" => {
            let key_code = arg
                .and_then(|a| a.trim().parse::<i32>().ok())
                .ok_or(RouteError::MissingKeyCode)?;
            Command::MediaButton {
                key_code,
                action: KeyAction::Down,
            }
        }
        id @ (Library::MEDIA_ID_JPOP | Library::MEDIA_ID_KPOP) => Command::PlayFromMediaId {
            media_id: id.to_string(),
        },
        other => return Err(RouteError::UnknownAction(other.to_string())),
    };
    Ok(cmd)
}

/// Map a command to the engine action.  `None` means "nothing for the engine
/// to do": ignored keys, unknown media ids, and daemon-level commands.
pub fn route(cmd: &Command) -> Option<Action> {
    match cmd {
        Command::PlayPause => Some(Action::Toggle),
        Command::Play => Some(Action::Play),
        Command::Pause => Some(Action::Pause),
        Command::Stop => Some(Action::Stop),
        Command::ToggleFavorite => Some(Action::ToggleFavorite),
        Command::Update => Some(Action::RequestUpdate),
        Command::TimerStop => Some(Action::FadeOut),
        Command::AudioBecomingNoisy => Some(Action::BecomingNoisy),
        Command::MediaButton { key_code, action } => media_key(*key_code, *action),
        Command::AuthStateChanged => Some(Action::AuthChanged),
        Command::PlayFromMediaId { media_id } => {
            Library::from_media_id(media_id).map(Action::ChangeLibrary)
        }
        Command::PlayFromSearch { query } => {
            Some(Action::PlayFromSearch(Library::from_search_query(query)))
        }
        Command::SetSleepTimer { minutes } => Some(Action::ArmSleepTimer { minutes: *minutes }),
        Command::CancelSleepTimer => Some(Action::CancelSleepTimer),
        Command::SetPreferences { .. }
        | Command::Login { .. }
        | Command::Logout
        | Command::GetState => None,
    }
}

/// Only key-down presses act; next/previous make no sense on a live stream.
pub fn media_key(key_code: i32, action: KeyAction) -> Option<Action> {
    if action != KeyAction::Down {
        return None;
    }
    match key_code {
        keycode::HEADSETHOOK | keycode::MEDIA_PLAY_PAUSE => Some(Action::Toggle),
        keycode::MEDIA_PLAY => Some(Action::Play),
        keycode::MEDIA_PAUSE => Some(Action::Pause),
        keycode::MEDIA_STOP => Some(Action::Stop),
        keycode::MEDIA_NEXT | keycode::MEDIA_PREVIOUS => None,
        _ => None,
    }
}
