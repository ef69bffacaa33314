//! Where decoded samples end up.

use std::time::{Duration, Instant};

use crate::player::PlayerError;

/// How far ahead of real time the null output accepts samples
const NULL_LEAD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub channels: u16,
    pub sample_rate: u32,
}

impl StreamSpec {
    /// playing time of `samples` interleaved samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        let frames = samples as f64 / f64::from(self.channels.max(1));
        Duration::from_secs_f64(frames / f64::from(self.sample_rate.max(1)))
    }
}

/// Long-lived sink for interleaved `f32` samples.
///
/// The output lives as long as the appliance; songs come and go in front
/// of it. None of the methods may block for long, they are called from
/// the cooperative loop.
pub trait AudioOutput {
    /// format of the samples written from now on
    fn configure(&mut self, spec: StreamSpec) -> Result<(), PlayerError>;

    /// Whether another packet can be written without piling up audio.
    fn wants_samples(&self) -> bool;

    fn write(&mut self, samples: &[f32]) -> Result<(), PlayerError>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Drops queued samples.
    fn clear(&mut self);

    /// linear gain in `[0, 1]`
    fn set_gain(&mut self, gain: f32);
}

impl<O: AudioOutput + ?Sized> AudioOutput for Box<O> {
    fn configure(&mut self, spec: StreamSpec) -> Result<(), PlayerError> {
        (**self).configure(spec)
    }

    fn wants_samples(&self) -> bool {
        (**self).wants_samples()
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlayerError> {
        (**self).write(samples)
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn set_gain(&mut self, gain: f32) {
        (**self).set_gain(gain)
    }
}

/// Discards samples at the pace a speaker would play them.
///
/// Used when the build has no speaker support, and keeps song lengths
/// and pause behaviour realistic on a headless box.
#[derive(Debug, Default)]
pub struct NullOutput {
    spec: Option<StreamSpec>,
    /// when the samples written so far would have finished playing
    drained_at: Option<Instant>,
    /// queued audio left when paused
    paused: Option<Duration>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for NullOutput {
    fn configure(&mut self, spec: StreamSpec) -> Result<(), PlayerError> {
        self.spec = Some(spec);
        Ok(())
    }

    fn wants_samples(&self) -> bool {
        if self.paused.is_some() {
            return false;
        }
        self.drained_at
            .is_none_or(|at| at <= Instant::now() + NULL_LEAD)
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlayerError> {
        let spec = self
            .spec
            .ok_or_else(|| PlayerError::Output("samples written before configure".to_string()))?;
        let now = Instant::now();
        let from = self.drained_at.filter(|at| *at > now).unwrap_or(now);
        self.drained_at = Some(from + spec.duration_of(samples.len()));
        Ok(())
    }

    fn pause(&mut self) {
        if self.paused.is_none() {
            let left = self
                .drained_at
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or_default();
            self.paused = Some(left);
        }
    }

    fn resume(&mut self) {
        if let Some(left) = self.paused.take() {
            self.drained_at = Some(Instant::now() + left);
        }
    }

    fn clear(&mut self) {
        self.drained_at = None;
        if self.paused.is_some() {
            self.paused = Some(Duration::ZERO);
        }
    }

    fn set_gain(&mut self, _gain: f32) {}
}

#[cfg(feature = "speaker")]
pub use speaker::SpeakerOutput;

#[cfg(feature = "speaker")]
mod speaker {
    use log::info;
    use rodio::{buffer::SamplesBuffer, OutputStream, OutputStreamHandle, Sink};

    use super::{AudioOutput, StreamSpec};
    use crate::player::PlayerError;

    /// packets queued in the sink before `wants_samples` says no
    const QUEUED_PACKETS: usize = 8;

    /// Default audio device through rodio.
    pub struct SpeakerOutput {
        // the stream stops playing once dropped
        _stream: OutputStream,
        _handle: OutputStreamHandle,
        sink: Sink,
        spec: Option<StreamSpec>,
    }

    impl SpeakerOutput {
        pub fn open() -> Result<Self, PlayerError> {
            let (stream, handle) =
                OutputStream::try_default().map_err(|e| PlayerError::Output(e.to_string()))?;
            let sink = Sink::try_new(&handle).map_err(|e| PlayerError::Output(e.to_string()))?;
            sink.pause();
            info!("audio output opened on the default device");
            Ok(Self {
                _stream: stream,
                _handle: handle,
                sink,
                spec: None,
            })
        }
    }

    impl AudioOutput for SpeakerOutput {
        fn configure(&mut self, spec: StreamSpec) -> Result<(), PlayerError> {
            self.spec = Some(spec);
            Ok(())
        }

        fn wants_samples(&self) -> bool {
            !self.sink.is_paused() && self.sink.len() < QUEUED_PACKETS
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), PlayerError> {
            let spec = self.spec.ok_or_else(|| {
                PlayerError::Output("samples written before configure".to_string())
            })?;
            self.sink.append(SamplesBuffer::new(
                spec.channels,
                spec.sample_rate,
                samples.to_vec(),
            ));
            Ok(())
        }

        fn pause(&mut self) {
            self.sink.pause();
        }

        fn resume(&mut self) {
            self.sink.play();
        }

        fn clear(&mut self) {
            self.sink.clear();
        }

        fn set_gain(&mut self, gain: f32) {
            self.sink.set_volume(gain);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const CD: StreamSpec = StreamSpec {
        channels: 2,
        sample_rate: 44_100,
    };

    #[test]
    fn durations_follow_the_stream_format() {
        assert_eq!(CD.duration_of(88_200), Duration::from_secs(1));
        let mono = StreamSpec {
            channels: 1,
            sample_rate: 8_000,
        };
        assert_eq!(mono.duration_of(4_000), Duration::from_millis(500));
    }

    #[test]
    fn null_output_paces_in_real_time() {
        let mut output = NullOutput::new();
        output.configure(CD).unwrap();

        assert!(output.wants_samples());
        // ten seconds of audio is far beyond the lead
        output.write(&vec![0.0; 882_000]).unwrap();
        assert!(!output.wants_samples());

        output.clear();
        assert!(output.wants_samples());
    }

    #[test]
    fn null_output_takes_nothing_while_paused() {
        let mut output = NullOutput::new();
        output.configure(CD).unwrap();

        output.pause();
        assert!(!output.wants_samples());
        output.resume();
        assert!(output.wants_samples());
    }

    #[test]
    fn null_output_needs_a_format() {
        let mut output = NullOutput::new();
        assert!(matches!(output.write(&[0.0]), Err(PlayerError::Output(_))));
    }
}
