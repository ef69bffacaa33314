use std::path::PathBuf;

use anyhow::bail;

const MOUNTS: &str = "/proc/self/mounts";

/// Finds where the removable drive labelled `label` is mounted.
///
/// Desktop automounters name the mount point after the volume label
/// (`/media/pi/MUSICBOX`), which is what gets matched here.
pub fn find_mount_by_label(label: &str) -> anyhow::Result<PathBuf> {
    let mounts = std::fs::read_to_string(MOUNTS)?;
    match mount_point_in(&mounts, label) {
        Some(path) => Ok(path),
        None => bail!("device '{label}' not mounted"),
    }
}

fn mount_point_in(mounts: &str, label: &str) -> Option<PathBuf> {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        // spaces in mount points are octal-escaped by the kernel
        .map(|mount| mount.replace("\\040", " "))
        .find(|mount| {
            mount
                .rsplit('/')
                .next()
                .is_some_and(|last| last == label)
        })
        .map(PathBuf::from)
}
