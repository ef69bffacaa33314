use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{LevelFilter, error, info, warn};
use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use crate::{
    appliance::Appliance,
    config::{self, Config, MediaConfig},
    control::{ControlHandle, LinkHealth, PlayerStatus},
    domain::tag::TagId,
    http::server::HttpServer,
    playback::orchestrator::Orchestrator,
    player::{
        decoder::SymphoniaFactory,
        output::{AudioOutput, NullOutput},
        pipeline::Pipeline,
    },
    reader::{
        sensor::{LineSensor, TagSensor},
        tracker::Tracker,
    },
    storage::{
        library::Library,
        links::{JsonFile, LinkStore},
    },
};

const ARGS_GROUP_LOGGING: &str = "logging";

#[derive(Parser)]
#[command(name = "tapdeck")]
#[command(version = "0.1")]
#[command(about = "Music player driven by NFC tags")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    pub quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the player: tag reader, playback loop and web interface
    Serve,
    /// List songs in the music directory
    Songs,
    /// List tag links
    Links,
    /// Link a tag to a song
    Link {
        /// Tag UID in hex, separators allowed (04:AA:BB:CC)
        uid: String,
        /// File name in the music directory, or /path from the volume root
        song: String,
    },
    /// Remove the link of a tag
    Unlink { uid: String },
}

/// Entrypoint for CLI
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);

    let config_path = cli.config.to_string_lossy();
    let cfg = config::Config::load(&config_path)?;

    match cli.command {
        Commands::Serve => serve(cfg),

        Commands::Songs => {
            let library = Library::open(&cfg.media)?;
            let songs = library.list_songs()?;
            println!("{} songs in {}", songs.len(), cfg.media.root);
            for song in songs {
                println!("    - {song}");
            }
            Ok(())
        }

        Commands::Links => {
            let library = Library::open(&cfg.media)?;
            let links = open_links(&library, &cfg.media);
            links.load().context("cannot read links")?;

            for link in links.all() {
                let marker = if library.song_exists(&link.song) {
                    ""
                } else {
                    "  [MISSING]"
                };
                println!("{} -> {}{marker}", link.uid, link.song);
            }
            Ok(())
        }

        Commands::Link { uid, song } => {
            let uid = TagId::parse(&uid)?;
            let library = Library::open(&cfg.media)?;
            let links = open_links(&library, &cfg.media);
            links.load().context("refusing to overwrite unreadable links")?;

            if !library.song_exists(&song) {
                warn!("{song} is not on the media volume yet");
            }
            links.link(uid.clone(), &song)?;
            println!("Linked {uid} to {song}");
            Ok(())
        }

        Commands::Unlink { uid } => {
            let uid = TagId::parse(&uid)?;
            let library = Library::open(&cfg.media)?;
            let links = open_links(&library, &cfg.media);
            links.load().context("refusing to overwrite unreadable links")?;

            if links.unlink(&uid)? {
                println!("Unlinked {uid}");
            } else {
                println!("{uid} was not linked");
            }
            Ok(())
        }
    }
}

fn serve(cfg: Config) -> anyhow::Result<()> {
    let library = Library::open(&cfg.media)?;
    info!("media volume at {}", library.root().to_string_lossy());

    let links = Arc::new(open_links(&library, &cfg.media));
    let link_health = match links.load() {
        Ok(count) => {
            info!("{count} tag links loaded");
            LinkHealth::Ok
        }
        Err(e) => {
            error!("{e}; starting without links");
            LinkHealth::Corrupt {
                error: e.to_string(),
            }
        }
    };

    let tracker = match &cfg.reader.device {
        Some(device) => Tracker::from_init(
            LineSensor::open(device).map(|sensor| Box::new(sensor) as Box<dyn TagSensor>),
            &cfg.reader,
        ),
        None => {
            info!("no tag reader configured");
            Tracker::disabled(&cfg.reader)
        }
    };

    let pipeline = Pipeline::new(
        open_output(),
        Box::new(SymphoniaFactory),
        cfg.audio.buffer_size,
        cfg.audio.volume,
    );
    let (control, commands) = ControlHandle::new(
        links.clone(),
        library.clone(),
        PlayerStatus::stopped(pipeline.volume()),
        tracker.is_enabled(),
    );
    control.set_link_health(link_health);
    let control = Arc::new(control);

    let http_server = HttpServer::new(control.clone(), cfg.http.clone());
    info!(
        "HTTP server running at http://{}:{}",
        http_server.config.bind_addr, http_server.config.port
    );
    thread::Builder::new()
        .name("http".to_string())
        .spawn(move || http_server.run())
        .context("failed to start HTTP server")?;

    let orchestrator = Orchestrator::new(links, library, pipeline);
    Appliance::new(
        tracker,
        orchestrator,
        control,
        commands,
        Duration::from_millis(cfg.audio.tick_ms),
    )
    .run();
    Ok(())
}

fn open_links(library: &Library, media: &MediaConfig) -> LinkStore {
    LinkStore::new(JsonFile::new(library.root().join(&media.links_file)))
}

#[cfg(feature = "speaker")]
fn open_output() -> Box<dyn AudioOutput> {
    use crate::player::output::SpeakerOutput;

    match SpeakerOutput::open() {
        Ok(output) => Box::new(output),
        Err(e) => {
            warn!("{e}; playing without sound");
            Box::new(NullOutput::new())
        }
    }
}

#[cfg(not(feature = "speaker"))]
fn open_output() -> Box<dyn AudioOutput> {
    warn!("built without the speaker feature, playing without sound");
    Box::new(NullOutput::new())
}

/// Initializes the logger facade.
///
/// `RUST_LOG` sets the base filter, `info` when unset. `-q` and `-v`
/// override it for this crate only.
fn init_logger(cli: &Cli) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if cli.quiet || cli.verbose > 0 {
        let level = match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        logger.filter_module(env!("CARGO_CRATE_NAME"), level);
    }

    logger.init();
}
