use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the tilecast binary.
#[derive(Debug, Parser)]
#[command(name = "tilecast", version, about = "Tile-dispatch render server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TILECAST_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP render server.
    Serve(Box<ServeArgs>),
    /// Render one tile locally and write it to a file.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Override the Blender executable path.
    #[arg(long = "blender-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub blender_path: Option<PathBuf>,

    /// Device used when a request names none (CPU|CUDA|OPTIX|HIP|ONEAPI).
    #[arg(long = "cycles-device", value_name = "DEVICE")]
    pub default_device: Option<String>,

    /// Override the directory scene files are served from.
    #[arg(long = "scenes-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub scenes_dir: Option<PathBuf>,

    /// Override the directory render output is written to before streaming.
    #[arg(long = "scratch-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub scratch_dir: Option<PathBuf>,

    /// Override the render thread count.
    #[arg(long = "threads", value_name = "COUNT")]
    pub threads: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the page served at `/`.
    #[arg(long = "index-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub index_file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Scene file name inside the scenes directory.
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Tiles per side.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub cols: i64,

    /// Tile index, counted from the top-left tile.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub n: i64,

    /// Output resolution width in pixels.
    #[arg(long = "resolution-x", value_name = "PIXELS")]
    pub resolution_x: Option<i64>,

    /// Output resolution height in pixels.
    #[arg(long = "resolution-y", value_name = "PIXELS")]
    pub resolution_y: Option<i64>,

    /// Output resolution scale.
    #[arg(long = "resolution-percentage", value_name = "PERCENT")]
    pub resolution_percentage: Option<i64>,

    /// Where to write the rendered tile.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}
