//! The playback loop.
//!
//! Every tick services the tag tracker, the queued remote commands and
//! the pipeline in turn, then publishes the player status. Nothing in a
//! tick may block for long.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use log::{debug, info};

use crate::{
    control::{Command, ControlHandle, PlayerStatus},
    playback::orchestrator::{Orchestrator, Outcome},
    player::output::AudioOutput,
    reader::tracker::Tracker,
    storage::links::{JsonFile, LinkFile},
};

/// packets decoded at most per tick
const PUMPS_PER_TICK: usize = 4;

pub struct Appliance<O: AudioOutput, F = JsonFile> {
    tracker: Tracker,
    orchestrator: Orchestrator<O, F>,
    control: Arc<ControlHandle<F>>,
    commands: Receiver<Command>,
    tick: Duration,
    /// published until the next song starts
    last_error: Option<String>,
}

impl<O: AudioOutput, F: LinkFile> Appliance<O, F> {
    pub fn new(
        tracker: Tracker,
        orchestrator: Orchestrator<O, F>,
        control: Arc<ControlHandle<F>>,
        commands: Receiver<Command>,
        tick: Duration,
    ) -> Self {
        Self {
            tracker,
            orchestrator,
            control,
            commands,
            tick,
            last_error: None,
        }
    }

    /// Runs the loop for the lifetime of the process.
    pub fn run(mut self) {
        info!(
            "playback loop running, tag reader {}",
            if self.tracker.is_enabled() { "enabled" } else { "disabled" }
        );
        loop {
            let started = Instant::now();
            self.tick(started);
            if let Some(rest) = self.tick.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(event) = self.tracker.service(now) {
            self.control.record_detection(event.uid.clone());
            let outcome = self.orchestrator.on_presence(&event);
            debug!("tag {}: {outcome:?}", event.uid);
            self.note(&outcome);
        }

        while let Ok(command) = self.commands.try_recv() {
            let outcome = self.orchestrator.apply(command);
            debug!("command: {outcome:?}");
            self.note(&outcome);
        }

        for _ in 0..PUMPS_PER_TICK {
            if self.orchestrator.service() {
                break;
            }
        }

        self.control.publish(self.status());
    }

    fn note(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Started(_) => self.last_error = None,
            Outcome::MissingSong(song) => {
                self.last_error = Some(format!("song {song} is missing from the media volume"));
            }
            Outcome::Failed(reason) => self.last_error = Some(reason.clone()),
            _ => {}
        }
    }

    fn status(&self) -> PlayerStatus {
        let pipeline = self.orchestrator.pipeline();
        PlayerStatus {
            state: pipeline.state(),
            current_song: pipeline.song().map(str::to_string),
            volume: pipeline.volume(),
            title: None,
            artist: None,
            last_error: self.last_error.clone(),
        }
        .with_tags(pipeline.tags())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::ReaderConfig,
        domain::tag::TagId,
        player::{
            PlaybackState, decoder::test_support::FakeDecoders,
            output::test_support::FakeOutput, pipeline::Pipeline, tags::test_support::id3_tag,
        },
        reader::sensor::test_support::{Read, ScriptedSensor},
        storage::{
            library::Library,
            links::{LinkStore, test_support::MemoryFile},
        },
    };

    const A: [u8; 4] = [0x04, 0xaa, 0xbb, 0xcc];

    fn appliance(
        sensor: ScriptedSensor,
        packets: usize,
    ) -> (TempDir, Appliance<FakeOutput, MemoryFile>, Arc<ControlHandle<MemoryFile>>) {
        let tmp = TempDir::new().unwrap();
        let music = tmp.path().join("music");
        fs::create_dir(&music).unwrap();
        let mut song = id3_tag("First Song", "Band");
        song.extend_from_slice(b"AUDIO");
        fs::write(music.join("track1.mp3"), song).unwrap();

        let links = Arc::new(LinkStore::new(MemoryFile::default()));
        links.load().unwrap();
        links.link(TagId::from_uid(&A), "track1.mp3").unwrap();
        let library = Library::new(tmp.path(), "music", 1024);

        let pipeline = Pipeline::new(
            FakeOutput::default(),
            Box::new(FakeDecoders::new(packets)),
            4096,
            0.8,
        );
        let orchestrator = Orchestrator::new(links.clone(), library.clone(), pipeline);
        let (control, commands) =
            ControlHandle::new(links, library, PlayerStatus::stopped(0.8), true);
        let control = Arc::new(control);
        let tracker = Tracker::new(Box::new(sensor), &ReaderConfig::default());

        let appliance = Appliance::new(
            tracker,
            orchestrator,
            control.clone(),
            commands,
            Duration::from_millis(10),
        );
        (tmp, appliance, control)
    }

    #[test]
    fn tag_starts_song_and_is_published() {
        let sensor = ScriptedSensor::default();
        sensor.push(Read::Tag(A.to_vec()));
        let (_tmp, mut appliance, control) = appliance(sensor, 1_000);

        appliance.tick(Instant::now());

        let status = control.status();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.current_song.as_deref(), Some("track1.mp3"));
        assert_eq!(status.title.as_deref(), Some("First Song"));
        assert_eq!(status.artist.as_deref(), Some("Band"));
        assert_eq!(
            control.last_detection().map(|d| d.uid),
            Some(TagId::from_uid(&A))
        );
    }

    #[test]
    fn queued_commands_run_on_the_next_tick() {
        let (_tmp, mut appliance, control) = appliance(ScriptedSensor::default(), 1_000);
        let t0 = Instant::now();

        control.send(Command::Play {
            song: "track1.mp3".to_string(),
        });
        control.send(Command::SetVolume(0.3));
        assert_eq!(control.status().state, PlaybackState::Stopped);

        appliance.tick(t0);
        assert_eq!(control.status().state, PlaybackState::Playing);
        assert_eq!(control.status().volume, 0.3);

        control.send(Command::Pause);
        appliance.tick(t0 + Duration::from_millis(10));
        assert_eq!(control.status().state, PlaybackState::Paused);
    }

    #[test]
    fn finished_song_is_published_as_stopped() {
        let sensor = ScriptedSensor::default();
        sensor.push(Read::Tag(A.to_vec()));
        let (_tmp, mut appliance, control) = appliance(sensor, 2);
        let t0 = Instant::now();

        for i in 0..5 {
            appliance.tick(t0 + Duration::from_millis(i * 10));
        }

        let status = control.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.current_song, None);
        assert_eq!(status.title, None);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn playback_failure_is_published_until_a_song_starts() {
        let (_tmp, mut appliance, control) = appliance(ScriptedSensor::default(), 1_000);
        let t0 = Instant::now();

        control.send(Command::Play {
            song: "gone.mp3".to_string(),
        });
        appliance.tick(t0);
        let status = control.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(
            status.last_error.as_deref(),
            Some("song gone.mp3 is missing from the media volume")
        );

        control.send(Command::Play {
            song: "track1.mp3".to_string(),
        });
        appliance.tick(t0 + Duration::from_millis(10));
        assert_eq!(control.status().last_error, None);
    }
}
