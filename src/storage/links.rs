//! Tag to song links, persisted as JSON on the media volume.
//!
//! The whole list is rewritten on every change. Readers take a cheap
//! `Arc` copy of the current list, writers build a new list, persist it
//! and only then swap it in, so a failed write never shows up in memory.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use anyhow::anyhow;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    domain::{link::Link, tag::TagId},
    storage::error::StorageError,
};

/// Durable home of the serialized link list.
pub trait LinkFile: Send {
    /// returns `None` when nothing was ever written
    fn read(&mut self) -> io::Result<Option<String>>;

    /// replaces the stored contents, all at once or not at all
    fn write(&mut self, contents: &str) -> io::Result<()>;

    fn describe(&self) -> String;
}

/// Link file on disk, replaced through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl LinkFile for JsonFile {
    fn read(&mut self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, contents: &str) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Deserialize)]
struct LinkDocument {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Serialize)]
struct LinkDocumentRef<'a> {
    links: &'a [Link],
}

/// Main structure holding the links.
///
/// Safe to share between the playback loop and http threads.
pub struct LinkStore<F = JsonFile> {
    /// also serializes writers
    file: Mutex<F>,
    links: RwLock<Arc<Vec<Link>>>,
}

impl<F: LinkFile> LinkStore<F> {
    /// creates an empty store, call [`LinkStore::load`] to fill it
    pub fn new(file: F) -> Self {
        Self {
            file: Mutex::new(file),
            links: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reads the link file. A missing file is created empty.
    ///
    /// On a corrupt file the store stays empty and the next change
    /// overwrites the file; the caller decides whether to go on.
    pub fn load(&self) -> Result<usize, StorageError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        self.replace(Vec::new());

        let Some(contents) = file.read()? else {
            info!("link file {} doesn't exist, creating it", file.describe());
            self.commit(&mut *file, Vec::new())?;
            return Ok(0);
        };

        let document: LinkDocument =
            serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
                path: file.describe(),
                source,
            })?;

        // a hand edited file may repeat a tag, the last entry wins
        let mut links: Vec<Link> = Vec::with_capacity(document.links.len());
        for link in document.links {
            if links.iter().any(|l| l.uid == link.uid) {
                warn!("tag {} linked more than once, keeping the last link", link.uid);
                links.retain(|l| l.uid != link.uid);
            }
            links.push(link);
        }

        let count = links.len();
        self.replace(links);
        info!("loaded {count} links from {}", file.describe());
        Ok(count)
    }

    /// Links `uid` to `song`, replacing any previous link of that tag.
    pub fn link(&self, uid: TagId, song: &str) -> Result<(), StorageError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);

        let mut links: Vec<Link> = self
            .snapshot()
            .iter()
            .filter(|link| link.uid != uid)
            .cloned()
            .collect();
        links.push(Link::new(uid.clone(), song));

        self.commit(&mut *file, links)?;
        info!("linked tag {uid} to {song}");
        Ok(())
    }

    /// Removes the link of `uid`. Returns whether there was one.
    pub fn unlink(&self, uid: &TagId) -> Result<bool, StorageError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.snapshot();
        if !current.iter().any(|link| &link.uid == uid) {
            debug!("tag {uid} is not linked, nothing to remove");
            return Ok(false);
        }

        let links = current
            .iter()
            .filter(|link| &link.uid != uid)
            .cloned()
            .collect();

        self.commit(&mut *file, links)?;
        info!("unlinked tag {uid}");
        Ok(true)
    }

    /// song linked to `uid`, if any
    pub fn resolve(&self, uid: &TagId) -> Option<String> {
        self.snapshot()
            .iter()
            .find(|link| &link.uid == uid)
            .map(|link| link.song.clone())
    }

    /// copy of all links in insertion order
    pub fn all(&self) -> Vec<Link> {
        self.snapshot().as_ref().clone()
    }

    fn snapshot(&self) -> Arc<Vec<Link>> {
        Arc::clone(&self.links.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, links: Vec<Link>) {
        *self.links.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(links);
    }

    /// persists `links`, then makes them visible
    fn commit(&self, file: &mut F, links: Vec<Link>) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(&LinkDocumentRef { links: &links })
            .map_err(|e| StorageError::Internal(anyhow!("failed to serialize links: {e}")))?;

        file.write(&contents).map_err(StorageError::DurableWrite)?;
        self.replace(links);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        io,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use super::LinkFile;

    /// In memory link file whose writes can be made to fail.
    #[derive(Clone, Default)]
    pub struct MemoryFile {
        pub contents: Arc<Mutex<Option<String>>>,
        pub fail_writes: Arc<AtomicBool>,
        pub writes: Arc<AtomicUsize>,
    }

    impl MemoryFile {
        pub fn with_contents(contents: &str) -> Self {
            let file = Self::default();
            *file.contents.lock().unwrap() = Some(contents.to_string());
            file
        }

        pub fn fail(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn stored(&self) -> Option<String> {
            self.contents.lock().unwrap().clone()
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl LinkFile for MemoryFile {
        fn read(&mut self) -> io::Result<Option<String>> {
            Ok(self.stored())
        }

        fn write(&mut self, contents: &str) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::other("card removed"));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.contents.lock().unwrap() = Some(contents.to_string());
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }
}
