//! NFC tag reading: sensors and the debounced presence tracker

use std::io;

use thiserror::Error;

pub mod sensor;
pub mod tracker;

#[derive(Debug, Error)]
pub enum ReaderError {
    /// the reader is missing or miswired, it stays off until restart
    #[error("tag reader {device} unavailable: {source}")]
    Init {
        device: String,
        #[source]
        source: io::Error,
    },

    /// a single failed read, the next poll may well succeed
    #[error("tag read failed: {0}")]
    Read(String),
}
