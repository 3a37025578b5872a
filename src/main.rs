mod broadcast;
mod decoding;
mod demux;
mod geometry;
mod playlist;
mod render;
mod server;
mod session;
mod telnet;

use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Parser;
use log::info;

use crate::playlist::Playlist;
use crate::render::RenderMode;
use crate::server::{Server, ServerConfig};

/// Terminal cells are roughly twice as tall as they are wide in most
/// fonts.
const CHAR_ASPECT: f64 = 2.0;

#[derive(Debug, Parser)]
#[command(name = "telecine")]
#[command(about = "Streams video as ANSI/ASCII frames to telnet clients")]
#[command(version)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 2323)]
    port: u16,

    /// Frames per second asked of the decoder.
    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// Base render width in pixels.
    #[arg(long, default_value_t = 240)]
    width: u32,

    /// Base render height in pixels.
    #[arg(long, default_value_t = 135)]
    height: u32,

    /// Stream a single media file instead of a directory.
    #[arg(long)]
    media: Option<PathBuf>,

    /// Directory enumerated recursively for media files, looped in
    /// lexicographic order.
    #[arg(long, default_value = "media")]
    media_dir: PathBuf,

    /// Render mode newly connected clients start in.
    #[arg(long, value_enum, default_value = "truecolor")]
    mode: RenderMode,

    /// Unflushed outbound bytes per client before frames are dropped.
    #[arg(long, default_value_t = 1024 * 1024)]
    backpressure_limit: usize,

    /// Characters that disconnect a client.
    #[arg(long, default_value = "qQ")]
    quit_keys: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    ensure!(cli.fps > 0, "frame rate must be positive");
    ensure!(
        cli.width > 0 && cli.height > 0,
        "render size must be positive"
    );
    ensure!(!cli.quit_keys.is_empty(), "at least one quit key is required");

    let playlist = match &cli.media {
        Some(path) => Playlist::single(path)?,
        None => Playlist::from_dir(&cli.media_dir)?,
    };

    info!(
        "telecine {}{}: {}x{} @ {} fps, {} item(s)",
        env!("CARGO_PKG_VERSION"),
        option_env!("TELECINE_GIT_HASH")
            .map(|hash| format!(" ({hash})"))
            .unwrap_or_default(),
        cli.width,
        cli.height,
        cli.fps,
        playlist.len()
    );

    let config = ServerConfig {
        port: cli.port,
        fps: cli.fps,
        base_w: cli.width,
        base_h: cli.height,
        char_aspect: CHAR_ASPECT,
        default_mode: cli.mode,
        backpressure_limit: cli.backpressure_limit,
        quit_keys: cli.quit_keys.into_bytes(),
    };
    Server::new(config, playlist).run()
}
