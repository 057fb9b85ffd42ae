//! Contract for the stateful rendering engine behind the coordinator.
//!
//! The engine holds at most one open scene and runs at most one render. None of
//! its methods are reentrant; callers serialize access (see
//! [`RenderCoordinator`](super::coordinator::RenderCoordinator)).

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::domain::{Device, TileRect};

/// Raster format written by `render_still`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
        }
    }

    /// Format name as Blender's image settings spell it.
    pub fn blender_name(&self) -> &'static str {
        match self {
            OutputFormat::Png => "PNG",
        }
    }
}

/// Everything the engine needs for one still render. Built fresh for every
/// request; a `None` resolution means "use the value saved in the scene".
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub threads: usize,
    pub persistent_data: bool,
    pub resolution_x: Option<u32>,
    pub resolution_y: Option<u32>,
    pub resolution_percentage: u32,
    pub border: Option<TileRect>,
}

pub trait RenderEngine: Send {
    /// Open `scene`, replacing whatever scene was open before.
    fn open_scene(&mut self, scene: &str) -> Result<(), EngineError>;

    /// Route subsequent renders to `device`.
    fn set_acceleration_device(&mut self, device: Device) -> Result<(), EngineError>;

    /// Render the open scene into `settings.output_path`, blocking until done.
    /// On error the output path must not be used.
    fn render_still(&mut self, settings: &RenderSettings) -> Result<(), EngineError>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("scene `{scene}` not found")]
    SceneNotFound { scene: String },
    #[error("scene `{scene}` is not a valid scene file: {reason}")]
    InvalidScene { scene: String, reason: String },
    #[error("failed to read scene `{scene}`")]
    SceneRead {
        scene: String,
        #[source]
        source: io::Error,
    },
    #[error("device {device} is not available on this host")]
    DeviceUnavailable { device: Device },
    #[error("device {device} could not be enabled: {reason}")]
    DeviceRejected { device: Device, reason: String },
    #[error("no scene is open")]
    NoScene,
    #[error("render engine unavailable")]
    Spawn(#[source] io::Error),
    #[error("render engine exited with {exit_code:?}: {stderr}")]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("render engine protocol error: {0}")]
    Protocol(String),
    #[error("render engine rejected the still: {reason}")]
    RenderRejected { reason: String },
    #[error("render engine produced no output")]
    EmptyOutput,
    #[error("scratch output unavailable")]
    Scratch(#[source] io::Error),
}
