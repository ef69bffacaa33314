//! Decoding with Symphonia.
//!
//! Decoding is pull based: the pipeline asks for one packet at a time
//! whenever the output has room, so a long song never holds up the loop.

use std::io::{self, Read};

use log::{debug, warn};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, Decoder as CodecDecoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource},
    meta::MetadataOptions,
    probe::Hint,
};

use crate::player::{
    PlayerError,
    output::{AudioOutput, StreamSpec},
};

/// consecutive malformed packets tolerated before giving up on a song
const MAX_RETRIES: usize = 3;

/// The filtered byte stream of one song.
pub type MediaInput = Box<dyn Read + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    Continue,
    EndOfStream,
}

pub trait Decoder {
    /// Decodes the next packet into `output`.
    fn pump(&mut self, output: &mut dyn AudioOutput) -> Result<Pump, PlayerError>;
}

/// Creates the decoder stage for a song.
pub trait DecoderFactory {
    /// `extension` of the song file, used as a probing hint.
    fn begin(
        &self,
        input: MediaInput,
        extension: Option<&str>,
    ) -> Result<Box<dyn Decoder>, PlayerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaFactory;

impl DecoderFactory for SymphoniaFactory {
    fn begin(
        &self,
        input: MediaInput,
        extension: Option<&str>,
    ) -> Result<Box<dyn Decoder>, PlayerError> {
        Ok(Box::new(SymphoniaDecoder::new(input, extension)?))
    }
}

pub struct SymphoniaDecoder {
    demuxer: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    buffer: Option<SampleBuffer<f32>>,
    spec: Option<StreamSpec>,
    skipped: usize,
}

impl SymphoniaDecoder {
    pub fn new(input: MediaInput, extension: Option<&str>) -> Result<Self, PlayerError> {
        let stream = MediaSourceStream::new(
            Box::new(ReadOnlySource::new(input)),
            MediaSourceStreamOptions::default(),
        );

        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let demuxer = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::DecodeInit(e.to_string()))?
            .format;

        let track = demuxer
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::DecodeInit("no audio track".to_string()))?;
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecodeInit(e.to_string()))?;

        Ok(Self {
            demuxer,
            decoder,
            track_id,
            buffer: None,
            spec: None,
            skipped: 0,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn pump(&mut self, output: &mut dyn AudioOutput) -> Result<Pump, PlayerError> {
        let packet = match self.demuxer.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Pump::EndOfStream);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(Pump::Continue);
            }
            Err(e) => return Err(PlayerError::Decode(e.to_string())),
        };
        if packet.track_id() != self.track_id {
            return Ok(Pump::Continue);
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                self.skipped += 1;
                if self.skipped > MAX_RETRIES {
                    return Err(PlayerError::Decode(format!(
                        "skipped too many packets, last: {e}"
                    )));
                }
                warn!("skipping malformed packet: {e}");
                return Ok(Pump::Continue);
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Pump::EndOfStream);
            }
            Err(e) => return Err(PlayerError::Decode(e.to_string())),
        };
        self.skipped = 0;

        let signal = *decoded.spec();
        let channels = signal.channels.count();
        let spec = StreamSpec {
            channels: u16::try_from(channels).unwrap_or(u16::MAX),
            sample_rate: signal.rate,
        };
        if self.spec != Some(spec) {
            debug!("{} channels at {} Hz", spec.channels, spec.sample_rate);
            output.configure(spec)?;
            self.spec = Some(spec);
        }

        let needed = decoded.capacity() * channels;
        let buffer = match self.buffer.take() {
            Some(buffer) if buffer.capacity() >= needed => buffer,
            _ => SampleBuffer::new(decoded.capacity() as u64, signal),
        };
        let buffer = self.buffer.insert(buffer);
        buffer.copy_interleaved_ref(decoded);
        output.write(buffer.samples())?;
        Ok(Pump::Continue)
    }
}
