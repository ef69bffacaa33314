use std::{
    fmt::Display,
    path::PathBuf,
};

use anyhow::Context;

use crate::{config::Location, storage::usb::find_mount_by_label};

pub mod error;
pub mod library;
pub mod links;
pub mod usb;

/// turns a configured location into a directory on this machine
pub fn resolve_location(location: &Location) -> Result<PathBuf, anyhow::Error> {
    match location {
        Location::File { path } => Ok(path.clone()),
        Location::Usb { label, path } => {
            let mount = find_mount_by_label(label)
                .with_context(|| format!("USB with label '{label}' not found"))?;

            Ok(mount.join(path))
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::File { path } => write!(f, "{}", path.to_string_lossy()),
            Location::Usb { label, path } => write!(f, "USB({})/{}", label, path.to_string_lossy()),
        }
    }
}
