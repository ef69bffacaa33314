use log::error;

use crate::cli::run;

mod appliance;
pub mod cli;
mod config;
mod control;
pub mod domain;
pub mod http;
mod playback;
pub mod player;
pub mod reader;
pub mod storage;

fn main() {
    if let Err(e) = run() {
        error!("{e:#}");
        std::process::exit(1);
    }
}
