//! Debounced tag presence.
//!
//! Tags are read over and over while they lie on the reader. The tracker
//! turns those reads into one [`PresenceEvent`] per presentation and is
//! the only place that knows about the debounce window.

use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::{
    config::ReaderConfig,
    domain::tag::TagId,
    reader::{ReaderError, sensor::TagSensor},
};

/// A tag was presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub uid: TagId,
    pub at: Instant,
    /// same tag seen less than one debounce window ago
    pub repeat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Presence {
    Idle,
    TagPresent(TagId),
}

pub struct Tracker {
    /// `None` once initialization failed, for the rest of the process
    sensor: Option<Box<dyn TagSensor>>,
    poll_interval: Duration,
    debounce: Duration,
    read_timeout: Duration,

    presence: Presence,
    last_poll: Option<Instant>,
    /// tag and time of the last emitted event
    last_emitted: Option<(TagId, Instant)>,
}

impl Tracker {
    pub fn new(sensor: Box<dyn TagSensor>, config: &ReaderConfig) -> Self {
        Self {
            sensor: Some(sensor),
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
            read_timeout: config.read_timeout(),
            presence: Presence::Idle,
            last_poll: None,
            last_emitted: None,
        }
    }

    /// A tracker that never reports anything.
    pub fn disabled(config: &ReaderConfig) -> Self {
        Self {
            sensor: None,
            ..Self::new(Box::new(NoSensor), config)
        }
    }

    /// Builds the tracker from the outcome of opening the sensor.
    ///
    /// A failed open is reported once; there is no retry, a missing
    /// reader needs someone to fix the wiring.
    pub fn from_init(
        sensor: Result<Box<dyn TagSensor>, ReaderError>,
        config: &ReaderConfig,
    ) -> Self {
        match sensor {
            Ok(sensor) => Self::new(sensor, config),
            Err(e) => {
                error!("{e}; tags will be ignored until restart");
                Self::disabled(config)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sensor.is_some()
    }

    /// Polls the sensor if the poll interval elapsed.
    ///
    /// Returns an event when a tag shows up that is not already
    /// present, or whose last event is more than one debounce window old.
    /// A tag held on the reader therefore emits once per window.
    pub fn service(&mut self, now: Instant) -> Option<PresenceEvent> {
        let sensor = self.sensor.as_mut()?;

        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < self.poll_interval {
                return None;
            }
        }
        self.last_poll = Some(now);

        let raw = match sensor.poll(self.read_timeout) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => {
                self.clear_presence();
                return None;
            }
            Err(e) => {
                // misreads are common and sort themselves out next poll
                debug!("{e}");
                self.clear_presence();
                return None;
            }
        };
        let uid = TagId::from_uid(&raw);

        let since_emitted = self
            .last_emitted
            .as_ref()
            .filter(|(emitted, _)| emitted == &uid)
            .map(|(_, at)| now.saturating_duration_since(*at));
        let already_present = self.presence == Presence::TagPresent(uid.clone());

        let stale = since_emitted.is_none_or(|elapsed| elapsed > self.debounce);
        if already_present && !stale {
            return None;
        }

        info!("tag detected: {uid}");
        self.presence = Presence::TagPresent(uid.clone());
        self.last_emitted = Some((uid.clone(), now));
        Some(PresenceEvent {
            uid,
            at: now,
            repeat: since_emitted.is_some_and(|elapsed| elapsed < self.debounce),
        })
    }

    fn clear_presence(&mut self) {
        if let Presence::TagPresent(uid) = &self.presence {
            info!("tag removed: {uid}");
            self.presence = Presence::Idle;
        }
    }
}

struct NoSensor;

impl TagSensor for NoSensor {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError> {
        Ok(None)
    }
}
