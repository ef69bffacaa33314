use std::{
    fs::File,
    io::BufReader,
    path::Path,
};

use log::{debug, info, warn};

use crate::player::{
    PlaybackState, PlayerError,
    decoder::{Decoder, DecoderFactory, Pump},
    output::AudioOutput,
    tags::{Id3Filter, TrackTags},
};

/// The stages of the song being played.
///
/// The decoder owns the filtered stream, which owns the buffer, which
/// owns the file, so dropping the chain releases them in that order.
struct Chain {
    decoder: Box<dyn Decoder>,
    song: String,
    tags: TrackTags,
    paused: bool,
}

/// Plays one song at a time into a long-lived output.
pub struct Pipeline<O: AudioOutput> {
    output: O,
    decoders: Box<dyn DecoderFactory>,
    buffer_size: usize,
    chain: Option<Chain>,
    volume: f32,
}

impl<O: AudioOutput> Pipeline<O> {
    pub fn new(
        mut output: O,
        decoders: Box<dyn DecoderFactory>,
        buffer_size: usize,
        volume: f32,
    ) -> Self {
        let volume = clamp_volume(volume).unwrap_or(1.0);
        output.set_gain(volume);
        Self {
            output,
            decoders,
            buffer_size,
            chain: None,
            volume,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.chain {
            None => PlaybackState::Stopped,
            Some(chain) if chain.paused => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
        }
    }

    /// song reference of the current chain
    pub fn song(&self) -> Option<&str> {
        self.chain.as_ref().map(|chain| chain.song.as_str())
    }

    pub fn tags(&self) -> Option<&TrackTags> {
        self.chain.as_ref().map(|chain| &chain.tags)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Starts `song` from the beginning, stopping whatever played before.
    ///
    /// On failure every stage built so far is dropped again and the
    /// pipeline stays stopped.
    pub fn start(&mut self, song: &str, path: &Path) -> Result<(), PlayerError> {
        self.stop();

        let file = File::open(path).map_err(|source| PlayerError::TrackOpen {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        let buffered = BufReader::with_capacity(self.buffer_size, file);
        let (filtered, tags) =
            Id3Filter::new(buffered).map_err(|e| PlayerError::DecodeInit(e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        let decoder = self
            .decoders
            .begin(Box::new(filtered), extension.as_deref())?;

        if !tags.is_empty() {
            debug!(
                "{song}: title {:?}, artist {:?}, album {:?}",
                tags.title, tags.artist, tags.album
            );
        }
        self.output.resume();
        self.chain = Some(Chain {
            decoder,
            song: song.to_string(),
            tags,
            paused: false,
        });
        info!("playing {song}");
        Ok(())
    }

    /// Moves the current song along by one packet if the output has room.
    ///
    /// Returns true when the song ended in this call. A song that fails
    /// to decode midway ends the same way.
    pub fn service(&mut self) -> bool {
        let Some(chain) = self.chain.as_mut() else {
            return false;
        };
        if chain.paused || !self.output.wants_samples() {
            return false;
        }

        match chain.decoder.pump(&mut self.output) {
            Ok(Pump::Continue) => false,
            Ok(Pump::EndOfStream) => {
                info!("finished {}", chain.song);
                self.chain = None;
                true
            }
            Err(e) => {
                warn!("{}: {e}", chain.song);
                self.chain = None;
                true
            }
        }
    }

    /// Returns false unless the pipeline was playing.
    pub fn pause(&mut self) -> bool {
        match self.chain.as_mut() {
            Some(chain) if !chain.paused => {
                chain.paused = true;
                self.output.pause();
                info!("paused {}", chain.song);
                true
            }
            _ => false,
        }
    }

    /// Returns false unless the pipeline was paused.
    pub fn resume(&mut self) -> bool {
        match self.chain.as_mut() {
            Some(chain) if chain.paused => {
                chain.paused = false;
                self.output.resume();
                info!("resumed {}", chain.song);
                true
            }
            _ => false,
        }
    }

    pub fn stop(&mut self) {
        if let Some(chain) = self.chain.take() {
            info!("stopped {}", chain.song);
        }
        self.output.clear();
    }

    /// Sets the output gain, clamped to `[0, 1]`. NaN is ignored.
    pub fn set_volume(&mut self, volume: f32) {
        if let Some(volume) = clamp_volume(volume) {
            self.volume = volume;
            self.output.set_gain(volume);
        }
    }

    #[cfg(test)]
    pub(crate) fn output(&self) -> &O {
        &self.output
    }
}

fn clamp_volume(volume: f32) -> Option<f32> {
    (!volume.is_nan()).then(|| volume.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::player::{
        decoder::test_support::FakeDecoders,
        output::test_support::FakeOutput,
        tags::test_support::id3_tag,
    };

    fn pipeline(decoders: &FakeDecoders) -> Pipeline<FakeOutput> {
        Pipeline::new(FakeOutput::default(), Box::new(decoders.clone()), 4096, 0.8)
    }

    fn song(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn pause_and_resume_only_apply_in_the_right_state() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = song(&dir, "track1.mp3", b"audio");
        let decoders = FakeDecoders::new(100);
        let mut pipeline = pipeline(&decoders);

        assert!(!pipeline.pause());
        assert!(!pipeline.resume());

        pipeline.start("track1.mp3", &path)?;
        assert_eq!(pipeline.state(), PlaybackState::Playing);
        assert!(!pipeline.resume());

        assert!(pipeline.pause());
        assert_eq!(pipeline.state(), PlaybackState::Paused);
        assert!(pipeline.output().recorded(|r| r.paused));
        assert!(!pipeline.pause());

        assert!(pipeline.resume());
        assert_eq!(pipeline.state(), PlaybackState::Playing);
        assert_eq!(pipeline.song(), Some("track1.mp3"));
        // the same chain went on, nothing was started again
        assert_eq!(decoders.log(|l| l.inputs.len()), 1);
        Ok(())
    }

    #[test]
    fn song_plays_to_the_end_and_can_start_again() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = song(&dir, "track1.mp3", b"audio");
        let decoders = FakeDecoders::new(3);
        let mut pipeline = pipeline(&decoders);

        pipeline.start("track1.mp3", &path)?;
        let mut finished = false;
        for _ in 0..10 {
            if pipeline.service() {
                finished = true;
                break;
            }
        }

        assert!(finished);
        assert_eq!(pipeline.state(), PlaybackState::Stopped);
        assert_eq!(pipeline.output().recorded(|r| r.samples), 12);
        assert_eq!(decoders.log(|l| l.dropped), 1);
        // queued samples are left to play out
        assert_eq!(pipeline.output().recorded(|r| r.clears), 1);

        pipeline.start("track1.mp3", &path)?;
        assert_eq!(pipeline.state(), PlaybackState::Playing);
        Ok(())
    }

    #[test]
    fn nothing_is_decoded_while_paused_or_output_full() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = song(&dir, "track1.mp3", b"audio");
        let decoders = FakeDecoders::new(100);
        let mut pipeline = pipeline(&decoders);

        pipeline.start("track1.mp3", &path)?;
        pipeline.pause();
        assert!(!pipeline.service());
        assert_eq!(pipeline.output().recorded(|r| r.samples), 0);

        pipeline.resume();
        pipeline.output().set_full(true);
        assert!(!pipeline.service());
        assert_eq!(pipeline.output().recorded(|r| r.samples), 0);

        pipeline.output().set_full(false);
        assert!(!pipeline.service());
        assert_eq!(pipeline.output().recorded(|r| r.samples), 4);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = song(&dir, "track1.mp3", b"audio");
        let decoders = FakeDecoders::new(100);
        let mut pipeline = pipeline(&decoders);

        pipeline.stop();
        assert_eq!(pipeline.state(), PlaybackState::Stopped);

        pipeline.start("track1.mp3", &path)?;
        pipeline.stop();
        pipeline.stop();
        assert_eq!(pipeline.state(), PlaybackState::Stopped);
        assert_eq!(pipeline.song(), None);
        assert_eq!(decoders.log(|l| l.dropped), 1);
        Ok(())
    }

    #[test]
    fn starting_replaces_the_current_song() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let one = song(&dir, "one.mp3", b"one");
        let two = song(&dir, "two.flac", b"two");
        let decoders = FakeDecoders::new(100);
        let mut pipeline = pipeline(&decoders);

        pipeline.start("one.mp3", &one)?;
        pipeline.pause();
        pipeline.start("two.flac", &two)?;

        assert_eq!(pipeline.state(), PlaybackState::Playing);
        assert_eq!(pipeline.song(), Some("two.flac"));
        assert_eq!(decoders.log(|l| l.dropped), 1);
        assert_eq!(
            decoders.log(|l| l.extensions.clone()),
            vec![Some("mp3".to_string()), Some("flac".to_string())]
        );
        Ok(())
    }

    #[test]
    fn missing_file_leaves_pipeline_stopped() {
        let decoders = FakeDecoders::new(1);
        let mut pipeline = pipeline(&decoders);

        let result = pipeline.start("gone.mp3", Path::new("/nonexistent/gone.mp3"));

        assert!(matches!(result, Err(PlayerError::TrackOpen { .. })));
        assert_eq!(pipeline.state(), PlaybackState::Stopped);
    }

    #[test]
    fn decoder_failure_leaves_pipeline_stopped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = song(&dir, "track1.mp3", b"audio");
        let decoders = FakeDecoders {
            fail_begin: true,
            ..FakeDecoders::new(1)
        };
        let mut pipeline = pipeline(&decoders);

        let result = pipeline.start("track1.mp3", &path);

        assert!(matches!(result, Err(PlayerError::DecodeInit(_))));
        assert_eq!(pipeline.state(), PlaybackState::Stopped);
        Ok(())
    }

    #[test]
    fn decoder_never_sees_the_tag() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut bytes = id3_tag("Song", "Band");
        bytes.extend_from_slice(b"AUDIO");
        let path = song(&dir, "tagged.mp3", &bytes);
        let decoders = FakeDecoders::new(1);
        let mut pipeline = pipeline(&decoders);

        pipeline.start("tagged.mp3", &path)?;

        assert_eq!(decoders.log(|l| l.inputs[0].clone()), b"AUDIO");
        let tags = pipeline.tags().cloned().unwrap_or_default();
        assert_eq!(tags.title.as_deref(), Some("Song"));
        assert_eq!(tags.artist.as_deref(), Some("Band"));
        Ok(())
    }

    #[test]
    fn volume_is_clamped() {
        let decoders = FakeDecoders::new(1);
        let mut pipeline = pipeline(&decoders);
        assert_eq!(pipeline.output().recorded(|r| r.gain), Some(0.8));

        pipeline.set_volume(1.7);
        assert_eq!(pipeline.volume(), 1.0);
        pipeline.set_volume(-0.5);
        assert_eq!(pipeline.volume(), 0.0);
        pipeline.set_volume(f32::NAN);
        assert_eq!(pipeline.volume(), 0.0);
        pipeline.set_volume(0.25);
        assert_eq!(pipeline.output().recorded(|r| r.gain), Some(0.25));
    }
}
