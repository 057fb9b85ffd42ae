//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{domain::Device, infra::scenes::DEFAULT_SCENE_EXTENSION};

mod cli;

pub use cli::{
    CliArgs, Command, EngineOverrides, LoggingOverrides, RenderArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tilecast";
const ENV_PREFIX: &str = "TILECAST";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_INDEX_FILE: &str = "index.html";
const DEFAULT_BLENDER_PATH: &str = "blender";
const DEFAULT_SCENES_DIR: &str = ".";
const SCRATCH_SUBDIR: &str = "tilecast";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub index_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub blender_path: PathBuf,
    pub default_device: Device,
    pub available_devices: Vec<Device>,
    pub scenes_dir: PathBuf,
    pub scene_extension: String,
    pub scratch_dir: PathBuf,
    pub threads: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.available_devices")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_engine_overrides(&args.engine);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(index) = overrides.index_file.as_ref() {
            self.server.index_file = Some(index.clone());
        }
        self.apply_logging_overrides(&overrides.logging);
        self.apply_engine_overrides(&overrides.engine);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(path) = overrides.blender_path.as_ref() {
            self.engine.blender_path = Some(path.clone());
        }
        if let Some(device) = overrides.default_device.as_ref() {
            self.engine.default_device = Some(device.clone());
        }
        if let Some(dir) = overrides.scenes_dir.as_ref() {
            self.engine.scenes_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.engine.scratch_dir = Some(dir.clone());
        }
        if let Some(threads) = overrides.threads {
            self.engine.threads = Some(threads);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            server: build_server_settings(raw.server)?,
            logging: build_logging_settings(raw.logging)?,
            engine: build_engine_settings(raw.engine)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let index_file = server
        .index_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_FILE));

    Ok(ServerSettings { addr, index_file })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let blender_path = engine
        .blender_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BLENDER_PATH));

    let default_device = match engine.default_device.as_deref() {
        Some(name) => parse_device(name, "engine.default_device")?,
        None => Device::Cpu,
    };

    let available_devices = match engine.available_devices {
        Some(names) => names
            .iter()
            .map(|name| parse_device(name, "engine.available_devices"))
            .collect::<Result<Vec<_>, _>>()?,
        None => Device::ALL.to_vec(),
    };
    if available_devices.is_empty() {
        return Err(LoadError::invalid(
            "engine.available_devices",
            "at least one device must be available",
        ));
    }
    if !available_devices.contains(&default_device) {
        return Err(LoadError::invalid(
            "engine.default_device",
            format!("{default_device} is not listed in engine.available_devices"),
        ));
    }

    let scene_extension = engine
        .scene_extension
        .map(|ext| ext.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_SCENE_EXTENSION.to_string());
    if scene_extension.is_empty() {
        return Err(LoadError::invalid(
            "engine.scene_extension",
            "extension must not be empty",
        ));
    }

    let threads = match engine.threads {
        Some(threads) => NonZeroUsize::new(threads)
            .ok_or_else(|| LoadError::invalid("engine.threads", "must be greater than zero"))?,
        None => NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN),
    };

    Ok(EngineSettings {
        blender_path,
        default_device,
        available_devices,
        scenes_dir: engine
            .scenes_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCENES_DIR)),
        scene_extension,
        scratch_dir: engine
            .scratch_dir
            .unwrap_or_else(|| std::env::temp_dir().join(SCRATCH_SUBDIR)),
        threads,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    index_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    blender_path: Option<PathBuf>,
    default_device: Option<String>,
    available_devices: Option<Vec<String>>,
    scenes_dir: Option<PathBuf>,
    scene_extension: Option<String>,
    scratch_dir: Option<PathBuf>,
    threads: Option<usize>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_device(name: &str, key: &'static str) -> Result<Device, LoadError> {
    Device::from_str(name).map_err(|err| LoadError::invalid(key, err.to_string()))
}
