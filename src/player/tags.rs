//! Strips the ID3v2 tag in front of a song so the decoder only sees audio.
//!
//! The text frames worth showing (title, artist, album) are handed back
//! as a value when the filter is built.

use std::io::{self, Read, Seek, SeekFrom};

use id3::{Tag, TagLike};
use log::debug;
use serde::Serialize;

/// an ID3v2 header; shorter streams cannot carry a tag
const HEADER_LEN: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TrackTags {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }

    fn from_tag(tag: &Tag) -> Self {
        Self {
            title: text(tag.title()),
            artist: text(tag.artist()),
            album: text(tag.album()),
        }
    }
}

fn text(frame: Option<&str>) -> Option<String> {
    let trimmed = frame?.trim_end_matches('\0').trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Reader that hides a leading ID3v2 tag.
pub struct Id3Filter<R> {
    inner: R,
}

impl<R: Read + Seek> Id3Filter<R> {
    /// Consumes the tag at the start of `inner`, if there is one.
    ///
    /// A tag that cannot be parsed is still skipped, the song just has no
    /// tags then. A tag running past the end of the stream is an error.
    pub fn new(mut inner: R) -> io::Result<(Self, TrackTags)> {
        let start = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(start))?;
        if end.saturating_sub(start) < HEADER_LEN {
            return Ok((Self { inner }, TrackTags::default()));
        }

        let tags = match Tag::read_from2(&mut inner) {
            Ok(tag) => TrackTags::from_tag(&tag),
            Err(id3::Error {
                kind: id3::ErrorKind::NoTag,
                ..
            }) => {
                inner.seek(SeekFrom::Start(start))?;
                return Ok((Self { inner }, TrackTags::default()));
            }
            Err(e) => {
                debug!("unreadable tag: {e}");
                e.partial_tag
                    .as_ref()
                    .map(TrackTags::from_tag)
                    .unwrap_or_default()
            }
        };

        inner.seek(SeekFrom::Start(start))?;
        Tag::skip(&mut inner).map_err(io::Error::other)?;
        if inner.stream_position()? > end {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        Ok((Self { inner }, tags))
    }
}

impl<R: Read> Read for Id3Filter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use id3::Version;

    use super::{test_support::id3_tag, *};

    fn filtered(data: &[u8]) -> (Vec<u8>, TrackTags) {
        let (mut filter, tags) = Id3Filter::new(Cursor::new(data)).unwrap();
        let mut out = Vec::new();
        filter.read_to_end(&mut out).unwrap();
        (out, tags)
    }

    #[test]
    fn strips_tag_and_reports_frames() {
        let mut song = id3_tag("Song", "Band");
        song.extend_from_slice(b"\xff\xfbAUDIO");

        let (audio, tags) = filtered(&song);

        assert_eq!(audio, b"\xff\xfbAUDIO");
        assert_eq!(tags.title.as_deref(), Some("Song"));
        assert_eq!(tags.artist.as_deref(), Some("Band"));
        assert_eq!(tags.album, None);
    }

    #[test]
    fn untagged_stream_passes_through() {
        let (audio, tags) = filtered(b"\xff\xfbplain mp3 frames");
        assert_eq!(audio, b"\xff\xfbplain mp3 frames");
        assert!(tags.is_empty());

        let (audio, _) = filtered(b"ID3");
        assert_eq!(audio, b"ID3");
    }

    #[test]
    fn reads_older_tag_versions() {
        let mut tag = Tag::new();
        tag.set_album("Album");
        tag.set_artist("  ");
        let mut song = Vec::new();
        tag.write_to(&mut song, Version::Id3v23).unwrap();
        song.extend_from_slice(b"AUDIO");

        let (audio, tags) = filtered(&song);

        assert_eq!(audio, b"AUDIO");
        assert_eq!(tags.album.as_deref(), Some("Album"));
        assert_eq!(tags.artist, None);
    }

    #[test]
    fn truncated_tag_leaves_no_audio() {
        let mut song = id3_tag("Song", "Band");
        song.truncate(song.len() - 4);

        // either refused outright or nothing left after the tag
        if let Ok((mut filter, _)) = Id3Filter::new(Cursor::new(&song[..])) {
            let mut out = Vec::new();
            filter.read_to_end(&mut out).unwrap();
            assert!(out.is_empty());
        }
    }
}
