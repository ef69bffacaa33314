//! Audio playback: the per-song stage chain and the long-lived output.
//!
//! A song is played through `File -> BufReader -> Id3Filter -> Decoder`,
//! rendered into an [`output::AudioOutput`] that outlives all songs.

use std::{fmt::Display, io};

use serde::Serialize;
use thiserror::Error;

pub mod decoder;
pub mod output;
pub mod pipeline;
pub mod tags;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cannot open {path}: {source}")]
    TrackOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot start decoder: {0}")]
    DecodeInit(String),

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Output(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
