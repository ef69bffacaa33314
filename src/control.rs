//! What the http threads and the playback loop share.
//!
//! The loop is the only one touching the pipeline. Everybody else reads
//! the status it publishes and queues [`Command`]s for it.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use serde::Serialize;

use crate::{
    domain::tag::TagId,
    player::{PlaybackState, tags::TrackTags},
    storage::{
        library::Library,
        links::{JsonFile, LinkFile, LinkStore},
    },
};

/// Remote playback request, executed on the next loop tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play { song: String },
    Pause,
    Resume,
    Stop,
    SetVolume(f32),
}

/// Snapshot of the player, replaced by the loop once per tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub current_song: Option<String>,
    pub volume: f32,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// why the last tag or play request did not start a song
    pub last_error: Option<String>,
}

impl PlayerStatus {
    pub fn stopped(volume: f32) -> Self {
        Self {
            state: PlaybackState::Stopped,
            current_song: None,
            volume,
            title: None,
            artist: None,
            last_error: None,
        }
    }

    pub fn with_tags(mut self, tags: Option<&TrackTags>) -> Self {
        if let Some(tags) = tags {
            self.title = tags.title.clone();
            self.artist = tags.artist.clone();
        }
        self
    }
}

/// Whether the link file could be read at startup.
///
/// A corrupt file stays reported until a link change rewrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LinkHealth {
    Ok,
    Corrupt { error: String },
}

/// A tag seen by the reader, kept until someone clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub uid: TagId,
    pub at: DateTime<Utc>,
}

pub struct ControlHandle<F = JsonFile> {
    pub links: Arc<LinkStore<F>>,
    pub library: Library,
    status: RwLock<PlayerStatus>,
    commands: Sender<Command>,
    scan: Mutex<Option<Detection>>,
    link_health: RwLock<LinkHealth>,
    reader_enabled: bool,
}

impl<F: LinkFile> ControlHandle<F> {
    /// Returns the handle and the receiving end of its command queue.
    pub fn new(
        links: Arc<LinkStore<F>>,
        library: Library,
        initial: PlayerStatus,
        reader_enabled: bool,
    ) -> (Self, Receiver<Command>) {
        let (commands, queue) = crossbeam_channel::unbounded();
        let handle = Self {
            links,
            library,
            status: RwLock::new(initial),
            commands,
            scan: Mutex::new(None),
            link_health: RwLock::new(LinkHealth::Ok),
            reader_enabled,
        };
        (handle, queue)
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, status: PlayerStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Queues a command. Returns false once the loop is gone.
    pub fn send(&self, command: Command) -> bool {
        debug!("queued {command:?}");
        self.commands.send(command).is_ok()
    }

    pub fn reader_enabled(&self) -> bool {
        self.reader_enabled
    }

    pub fn link_health(&self) -> LinkHealth {
        self.link_health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_link_health(&self, health: LinkHealth) {
        *self
            .link_health
            .write()
            .unwrap_or_else(PoisonError::into_inner) = health;
    }

    pub fn record_detection(&self, uid: TagId) {
        let detection = Detection {
            uid,
            at: Utc::now(),
        };
        *self.scan.lock().unwrap_or_else(PoisonError::into_inner) = Some(detection);
    }

    /// last tag seen since the previous clear
    pub fn last_detection(&self) -> Option<Detection> {
        self.scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_detection(&self) {
        *self.scan.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
