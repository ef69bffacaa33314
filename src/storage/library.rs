//! Music files on the media volume

use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use log::{info, warn};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::{
    config::MediaConfig,
    storage::{error::StorageError, resolve_location},
};

const MUSIC_EXTENSIONS: &[&str] = &["mp3", "flac", "wav"];

pub fn is_music_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MUSIC_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Best-effort check that a path points to a real, playable music file.
///
/// This does NOT decode audio, but rules out missing paths, directories
/// and empty files.
pub fn is_valid_music_path(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// The music directory of the media volume
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    music_dir: PathBuf,
    max_upload_size: u64,
}

impl Library {
    pub fn new<P: AsRef<Path>>(root: P, music_dir: &str, max_upload_size: u64) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            music_dir: root.join(music_dir),
            root,
            max_upload_size,
        }
    }

    /// finds the media volume and makes sure the music directory exists
    pub fn open(config: &MediaConfig) -> Result<Self, StorageError> {
        let root = resolve_location(&config.root)
            .map_err(|e| StorageError::Internal(e.context("failed to resolve media volume")))?;
        let library = Self::new(root, &config.music_dir, config.max_upload_size);
        library.ensure_music_dir()?;
        Ok(library)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_music_dir(&self) -> Result<(), StorageError> {
        if !self.music_dir.is_dir() {
            std::fs::create_dir_all(&self.music_dir)?;
            info!("created music directory {}", self.music_dir.to_string_lossy());
        }
        Ok(())
    }

    /// names of the music files in the music directory, sorted
    pub fn list_songs(&self) -> Result<Vec<String>, StorageError> {
        let mut songs = Vec::new();
        for entry in WalkDir::new(&self.music_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(StorageError::Fs(err.into()));
                    }
                    warn!("skipping unreadable entry in music directory: {err}");
                    continue;
                }
            };

            if entry.file_type().is_file() && is_music_file(entry.path()) {
                songs.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        songs.sort();
        Ok(songs)
    }

    /// Path of a song reference.
    ///
    /// A reference starting with `/` is relative to the volume root,
    /// anything else is a file in the music directory.
    pub fn song_path(&self, song: &str) -> PathBuf {
        match song.strip_prefix('/') {
            Some(on_volume) => self.root.join(on_volume),
            None => self.music_dir.join(song),
        }
    }

    pub fn song_exists(&self, song: &str) -> bool {
        is_valid_music_path(&self.song_path(song))
    }

    /// opens a song of the music directory for streaming
    pub fn open_song(&self, name: &str) -> Result<(File, PathBuf), StorageError> {
        validate_name(name)?;
        let path = self.music_dir.join(name);
        match File::open(&path) {
            Ok(file) => Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SongNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_song(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        match std::fs::remove_file(self.music_dir.join(name)) {
            Ok(()) => {
                info!("deleted song {name}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SongNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores an uploaded song, replacing one with the same name.
    ///
    /// The data lands in a temporary file first, so an interrupted or
    /// oversized upload leaves nothing behind.
    pub fn save_song<R: Read>(&self, name: &str, data: R) -> Result<u64, StorageError> {
        validate_name(name)?;

        let mut tmp = NamedTempFile::new_in(&self.music_dir)?;
        let mut limited = data.take(self.max_upload_size + 1);
        let written = io::copy(&mut limited, &mut tmp)?;
        if written > self.max_upload_size {
            return Err(StorageError::TooLarge {
                limit: self.max_upload_size,
            });
        }

        tmp.flush()?;
        tmp.persist(self.music_dir.join(name))
            .map_err(|e| StorageError::Fs(e.error))?;
        info!("stored song {name} ({written} bytes)");
        Ok(written)
    }
}

/// accepts plain music file names only, nothing that walks the tree
fn validate_name(name: &str) -> Result<(), StorageError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);

    if plain && is_music_file(Path::new(name)) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
