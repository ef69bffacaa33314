use anyhow::{Context, bail};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    pub media: MediaConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {path}"))?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> anyhow::Result<Config> {
        let cfg: Config = toml::from_str(contents).with_context(|| "Failed to parse config TOML")?;
        let volume = cfg.audio.volume;
        if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
            bail!("audio.volume must be between 0 and 1, got {volume}");
        }
        Ok(cfg)
    }
}

/// Where a directory lives: a plain path, or a path inside a removable
/// drive found by its mount label.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    File {
        path: PathBuf,
    },
    Usb {
        label: String,
        #[serde(default)]
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub root: Location,
    #[serde(default = "default_music_dir")]
    pub music_dir: String,
    #[serde(default = "default_links_file")]
    pub links_file: String,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_music_dir() -> String {
    "music".to_string()
}

fn default_links_file() -> String {
    "nfc_links.json".to_string()
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReaderConfig {
    /// character device or fifo printing one UID per line; no reader when unset
    pub device: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            device: None,
            poll_interval_ms: 500,
            debounce_ms: 1500,
            read_timeout_ms: 50,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AudioConfig {
    /// read-ahead between the media volume and the decoder, in bytes
    pub buffer_size: usize,
    pub volume: f32,
    /// pause between two ticks of the playback loop
    pub tick_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            volume: 0.8,
            tick_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_config_toml() -> anyhow::Result<()> {
        let toml_str = r#"
version = 1

[media]
root = { kind = "file", path = "/mnt/sd" }
music_dir = "songs"

[reader]
device = "/dev/ttyUSB0"
debounce_ms = 2000

[audio]
volume = 0.5

[http]
bind_addr = "127.0.0.1"
port = 8080
"#;

        let cfg: Config = toml::from_str(toml_str)?;

        assert_eq!(cfg.version, 1);
        assert_eq!(
            cfg.media.root,
            Location::File {
                path: PathBuf::from("/mnt/sd")
            }
        );
        assert_eq!(cfg.media.music_dir, "songs");
        assert_eq!(cfg.media.links_file, "nfc_links.json");

        assert_eq!(cfg.reader.device, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(cfg.reader.debounce(), Duration::from_millis(2000));
        // untouched keys keep their defaults
        assert_eq!(cfg.reader.poll_interval(), Duration::from_millis(500));

        assert_eq!(cfg.audio.volume, 0.5);
        assert_eq!(cfg.audio.buffer_size, 32 * 1024);
        assert_eq!(cfg.http.port, 8080);

        Ok(())
    }

    #[test]
    fn test_parse_usb_media_with_defaults() -> anyhow::Result<()> {
        let toml_str = r#"
version = 1

[media.root]
kind = "usb"
label = "MUSICBOX"
"#;

        let cfg: Config = toml::from_str(toml_str)?;

        assert_eq!(
            cfg.media.root,
            Location::Usb {
                label: "MUSICBOX".to_string(),
                path: PathBuf::new(),
            }
        );
        assert_eq!(cfg.media.max_upload_size, 10 * 1024 * 1024);
        assert!(cfg.reader.device.is_none());
        assert_eq!(cfg.http.port, 80);
        assert_eq!(cfg.audio.volume, 0.8);

        Ok(())
    }

    #[test]
    fn test_volume_out_of_range_is_rejected() {
        let base = "version = 1\n[media]\nroot = { kind = \"file\", path = \"/mnt/sd\" }\n";

        for volume in ["nan", "inf", "1.5", "-0.1"] {
            let toml_str = format!("{base}[audio]\nvolume = {volume}\n");
            assert!(Config::parse(&toml_str).is_err(), "volume = {volume}");
        }
        assert!(Config::parse(&format!("{base}[audio]\nvolume = 1.0\n")).is_ok());
    }
}
