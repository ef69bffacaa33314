use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::{domain::tag::TagId, reader::ReaderError};

/// Pause before reopening a device whose writer went away
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Anything that can tell which tag, if any, is in front of the antenna.
pub trait TagSensor: Send {
    /// Waits at most `timeout` for a tag and returns its raw UID.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError>;
}

/// Sensor fed by a device that prints one hexadecimal UID per line.
///
/// USB readers in keyboard mode, serial bridges in front of a PN532 and
/// plain FIFOs all behave this way. Lines are read on a background
/// thread so `poll` never blocks longer than its timeout.
pub struct LineSensor {
    uids: Receiver<Vec<u8>>,
}

impl LineSensor {
    /// Opens `device`. Fails when it can't be opened at startup; later
    /// disconnects are retried in the background.
    pub fn open<P: AsRef<Path>>(device: P) -> Result<Self, ReaderError> {
        let path = device.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ReaderError::Init {
            device: path.to_string_lossy().to_string(),
            source,
        })?;

        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("tag-reader".to_string())
            .spawn(move || follow_device(path, file, tx))
            .map_err(|source| ReaderError::Init {
                device: device.as_ref().to_string_lossy().to_string(),
                source,
            })?;

        info!("tag reader listening on {}", device.as_ref().to_string_lossy());
        Ok(Self { uids: rx })
    }

    /// sensor over an already open stream, read until it ends
    #[cfg(test)]
    pub(crate) fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            forward_lines(reader, &tx);
        });
        Self { uids: rx }
    }
}

impl TagSensor for LineSensor {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError> {
        match self.uids.recv_timeout(timeout) {
            Ok(uid) => Ok(Some(uid)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ReaderError::Read("reader thread stopped".to_string()))
            }
        }
    }
}

fn follow_device(path: PathBuf, first: File, tx: Sender<Vec<u8>>) {
    // a regular file has nothing more to say once read
    if first.metadata().is_ok_and(|meta| meta.is_file()) {
        forward_lines(BufReader::new(first), &tx);
        return;
    }

    let mut file = Some(first);
    loop {
        let current = match file.take() {
            Some(file) => file,
            None => match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    debug!("reopening {} failed: {e}", path.to_string_lossy());
                    thread::sleep(REOPEN_DELAY);
                    continue;
                }
            },
        };

        if !forward_lines(BufReader::new(current), &tx) {
            return;
        }
        thread::sleep(REOPEN_DELAY);
    }
}

/// Returns false once nobody listens anymore.
fn forward_lines<R: BufRead>(reader: R, tx: &Sender<Vec<u8>>) -> bool {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("tag reader stream failed: {e}");
                return true;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_uid(&line) {
            Some(uid) => {
                if tx.send(uid).is_err() {
                    return false;
                }
            }
            None => warn!("ignoring unreadable tag line {line:?}"),
        }
    }
    true
}

fn parse_uid(line: &str) -> Option<Vec<u8>> {
    let id = TagId::parse(line).ok()?;
    let digits = id.as_str().as_bytes();
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parses_uid_lines() {
        assert_eq!(parse_uid("04aabbcc"), Some(vec![0x04, 0xaa, 0xbb, 0xcc]));
        assert_eq!(parse_uid("04:DD:EE:FF\r"), Some(vec![0x04, 0xdd, 0xee, 0xff]));
        assert_eq!(parse_uid("hello"), None);
    }

    #[test]
    fn line_sensor_yields_each_uid_once() {
        let input = Cursor::new("04AABBCC\n\ngarbage\n04DDEEFF\n");
        let mut sensor = LineSensor::from_reader(input);
        let wait = Duration::from_secs(1);

        assert_eq!(sensor.poll(wait).unwrap(), Some(vec![0x04, 0xaa, 0xbb, 0xcc]));
        assert_eq!(sensor.poll(wait).unwrap(), Some(vec![0x04, 0xdd, 0xee, 0xff]));
        // the stream ended and the thread went away
        assert!(matches!(sensor.poll(wait), Err(ReaderError::Read(_))));
    }

    #[test]
    fn missing_device_fails_at_open() {
        let result = LineSensor::open("/nonexistent/tag-reader");
        assert!(matches!(result, Err(ReaderError::Init { .. })));
    }
}
