//! Playback state synchronization engine.
//!
//! Merges stream phases, push-channel snapshots, connectivity edges,
//! preference changes and user commands into one [`view_model::PlaybackViewModel`]
//! and renders it to the session and notification handles.

pub mod engine;
pub mod favorite;
pub mod presenter;
pub mod router;
pub mod sources;
pub mod view_model;

pub use engine::{ChannelState, Engine, EngineError, EngineHandle, EngineSnapshot, ExitReason};
pub use sources::{Collaborators, Sources};
