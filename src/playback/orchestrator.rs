//! Decides what a tag or a remote command means for the player.

use std::sync::Arc;

use log::{info, warn};

use crate::{
    control::Command,
    player::{PlaybackState, output::AudioOutput, pipeline::Pipeline},
    reader::tracker::PresenceEvent,
    storage::{
        library::Library,
        links::{JsonFile, LinkFile, LinkStore},
    },
};

/// What happened in response to an event or command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Started(String),
    Paused,
    Resumed,
    Stopped,
    VolumeSet(f32),
    /// the tag has no song
    Unlinked,
    MissingSong(String),
    Failed(String),
    /// the command made no sense in the current state
    Ignored,
}

pub struct Orchestrator<O: AudioOutput, F = JsonFile> {
    links: Arc<LinkStore<F>>,
    library: Library,
    pipeline: Pipeline<O>,
}

impl<O: AudioOutput, F: LinkFile> Orchestrator<O, F> {
    pub fn new(links: Arc<LinkStore<F>>, library: Library, pipeline: Pipeline<O>) -> Self {
        Self {
            links,
            library,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<O> {
        &self.pipeline
    }

    /// Lets the pipeline make progress. Returns true when a song ended.
    pub fn service(&mut self) -> bool {
        self.pipeline.service()
    }

    /// Handles a tag put on the reader.
    ///
    /// Tapping the tag of a song again within the debounce window
    /// toggles pause. Any other presentation starts its song over.
    pub fn on_presence(&mut self, event: &PresenceEvent) -> Outcome {
        let Some(song) = self.links.resolve(&event.uid) else {
            info!("tag {} is not linked to a song", event.uid);
            return Outcome::Unlinked;
        };

        if event.repeat {
            match self.pipeline.state() {
                PlaybackState::Playing => {
                    self.pipeline.pause();
                    return Outcome::Paused;
                }
                PlaybackState::Paused => {
                    self.pipeline.resume();
                    return Outcome::Resumed;
                }
                PlaybackState::Stopped => {}
            }
        }

        self.play(&song)
    }

    pub fn apply(&mut self, command: Command) -> Outcome {
        match command {
            Command::Play { song } => self.play(&song),
            Command::Pause => {
                if self.pipeline.pause() {
                    Outcome::Paused
                } else {
                    Outcome::Ignored
                }
            }
            Command::Resume => {
                if self.pipeline.resume() {
                    Outcome::Resumed
                } else {
                    Outcome::Ignored
                }
            }
            Command::Stop => {
                self.pipeline.stop();
                Outcome::Stopped
            }
            Command::SetVolume(volume) => {
                self.pipeline.set_volume(volume);
                Outcome::VolumeSet(self.pipeline.volume())
            }
        }
    }

    fn play(&mut self, song: &str) -> Outcome {
        if !self.library.song_exists(song) {
            warn!("song {song} is missing from the media volume");
            return Outcome::MissingSong(song.to_string());
        }

        match self.pipeline.start(song, &self.library.song_path(song)) {
            Ok(()) => Outcome::Started(song.to_string()),
            Err(e) => {
                warn!("cannot play {song}: {e}");
                Outcome::Failed(e.to_string())
            }
        }
    }
}
