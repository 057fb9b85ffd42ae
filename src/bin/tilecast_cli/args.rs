//! Command-line surface for `tilecast-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Largest grid accepted by `fetch`.
pub const MAX_COLS: u32 = 256;

#[derive(Parser, Debug)]
#[command(name = "tilecast-cli", version, about = "tilecast render server client", long_about = None)]
pub struct Cli {
    /// Server base URL, e.g. <http://render-01:8080>
    #[arg(long, env = "TILECAST_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the scene files the server can render
    Scenes,
    /// Render every tile of a scene and stitch them into one PNG
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Scene file name as listed by `scenes`
    pub file: String,

    /// Tiles per side; the frame is split into cols × cols tiles
    #[arg(
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_COLS))
    )]
    pub cols: u32,

    /// Where to write the stitched image
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Acceleration device passed as `cyclesDevice`
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long = "resolution-x")]
    pub resolution_x: Option<u32>,

    #[arg(long = "resolution-y")]
    pub resolution_y: Option<u32>,

    #[arg(long = "resolution-percentage")]
    pub resolution_percentage: Option<u32>,

    /// Tile requests kept in flight; the server renders them one at a time
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,
}
