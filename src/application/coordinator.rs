//! Serialized access to the render engine.
//!
//! The engine cannot service two loads or renders at once, so every call to
//! [`RenderCoordinator::render`] runs inside one mutex. Waiting callers queue on
//! that mutex; nothing is rejected and nothing runs in parallel. There is no
//! timeout: a render that never returns blocks every render queued behind it.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use metrics::{counter, gauge, histogram};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    domain::{Device, DomainError, RenderPlan, RenderRequest, tile::tile_bounds_message},
    util::lock::mutex_lock,
};

use super::{
    engine::{EngineError, OutputFormat, RenderEngine, RenderSettings},
    session::EngineSession,
};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Used when a request names no device.
    pub default_device: Device,
    pub threads: usize,
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("{}", tile_bounds_message(.index, .grid_size))]
    InvalidTileIndex { index: i64, grid_size: i64 },
    #[error("failed to open scene `{scene}`")]
    EngineLoadFailed {
        scene: String,
        #[source]
        source: EngineError,
    },
    #[error("failed to switch to device {device}")]
    EngineDeviceFailed {
        device: Device,
        #[source]
        source: EngineError,
    },
    #[error("render failed")]
    RenderFailed {
        #[source]
        source: EngineError,
    },
}

impl RenderError {
    /// Whether the caller, rather than the engine or host, is at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            RenderError::InvalidRequest { .. } | RenderError::InvalidTileIndex { .. } => true,
            RenderError::EngineLoadFailed { .. }
            | RenderError::EngineDeviceFailed { .. }
            | RenderError::RenderFailed { .. } => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RenderError::InvalidRequest { .. } => "invalid_request",
            RenderError::InvalidTileIndex { .. } => "invalid_tile_index",
            RenderError::EngineLoadFailed { .. } => "engine_load_failed",
            RenderError::EngineDeviceFailed { .. } => "engine_device_failed",
            RenderError::RenderFailed { .. } => "render_failed",
        }
    }
}

impl From<DomainError> for RenderError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::InvalidRequest { message } => RenderError::InvalidRequest { message },
            DomainError::InvalidTileIndex { index, grid_size } => {
                RenderError::InvalidTileIndex { index, grid_size }
            }
        }
    }
}

/// A finished render sitting in its scratch file.
///
/// The scratch file is removed when this value (or the [`TempPath`] taken out of
/// it) is dropped.
#[derive(Debug)]
pub struct RenderOutput {
    scratch: TempPath,
    format: OutputFormat,
    byte_len: u64,
}

impl RenderOutput {
    pub fn path(&self) -> &Path {
        &self.scratch
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn into_temp_path(self) -> TempPath {
        self.scratch
    }
}

/// Engine session state as seen from inside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub loaded_file: Option<String>,
    pub active_device: Option<Device>,
}

pub struct RenderCoordinator {
    session: Mutex<EngineSession>,
    settings: CoordinatorSettings,
    waiting: AtomicUsize,
}

impl RenderCoordinator {
    pub fn new(engine: Box<dyn RenderEngine>, settings: CoordinatorSettings) -> Self {
        Self {
            session: Mutex::new(EngineSession::new(engine)),
            settings,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = mutex_lock(&self.session, "application::coordinator", "snapshot");
        SessionSnapshot {
            loaded_file: session.loaded_file().map(str::to_string),
            active_device: session.active_device(),
        }
    }

    /// Count and log a request for `scene` that was refused before it could be
    /// turned into a [`RenderRequest`].
    pub fn reject(&self, scene: &str, error: RenderError) -> RenderError {
        record_outcome(&error_chain(&error), error.kind(), scene, Instant::now());
        error
    }

    /// Validate `request`, then render it while holding the engine exclusively.
    ///
    /// Blocks the calling thread for the whole render, including time spent
    /// queued behind other renders.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderOutput, RenderError> {
        let started_at = Instant::now();
        let plan = request.validate().map_err(|err| {
            let err = RenderError::from(err);
            record_outcome(&err.to_string(), err.kind(), &request.file, started_at);
            err
        })?;

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("tilecast_render_waiting").set(queued as f64);
        let mut session = mutex_lock(&self.session, "application::coordinator", "render");
        let queued = self.waiting.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("tilecast_render_waiting").set(queued as f64);
        let queued_ms = started_at.elapsed().as_millis() as u64;

        let result = self.render_locked(&mut session, &plan);
        drop(session);

        let elapsed = started_at.elapsed();
        histogram!("tilecast_render_ms").record(elapsed.as_secs_f64() * 1000.0);
        match &result {
            Ok(output) => {
                counter!("tilecast_render_total", "result" => "ok").increment(1);
                info!(
                    target = "application::coordinator",
                    op = "coordinator::render",
                    result = "ok",
                    scene = %plan.file,
                    cols = plan.tile.grid_size(),
                    n = plan.tile.tile_index(),
                    queued_ms,
                    elapsed_ms = elapsed.as_millis() as u64,
                    output_bytes = output.byte_len(),
                    "Tile rendered"
                );
            }
            Err(err) => record_outcome(&error_chain(err), err.kind(), &plan.file, started_at),
        }
        result
    }

    fn render_locked(
        &self,
        session: &mut EngineSession,
        plan: &RenderPlan,
    ) -> Result<RenderOutput, RenderError> {
        session
            .ensure_loaded(&plan.file)
            .map_err(|source| RenderError::EngineLoadFailed {
                scene: plan.file.clone(),
                source,
            })?;

        let device = plan.device.unwrap_or(self.settings.default_device);
        session
            .ensure_device(device)
            .map_err(|source| RenderError::EngineDeviceFailed { device, source })?;

        let format = OutputFormat::Png;
        let scratch = tempfile::Builder::new()
            .prefix("tile-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile_in(&self.settings.scratch_dir)
            .map_err(|err| RenderError::RenderFailed {
                source: EngineError::Scratch(err),
            })?
            .into_temp_path();

        let settings = RenderSettings {
            output_path: scratch.to_path_buf(),
            format,
            threads: self.settings.threads,
            persistent_data: true,
            resolution_x: plan.resolution_x,
            resolution_y: plan.resolution_y,
            resolution_percentage: plan.resolution_percentage,
            border: plan.tile.border(),
        };

        // `scratch` is dropped, and the file removed, on every early return below.
        session
            .render_still(&settings)
            .map_err(|source| RenderError::RenderFailed { source })?;

        let byte_len = fs::metadata(&scratch)
            .map_err(|err| RenderError::RenderFailed {
                source: EngineError::Scratch(err),
            })?
            .len();
        if byte_len == 0 {
            return Err(RenderError::RenderFailed {
                source: EngineError::EmptyOutput,
            });
        }

        Ok(RenderOutput {
            scratch,
            format,
            byte_len,
        })
    }
}

fn record_outcome(detail: &str, kind: &'static str, scene: &str, started_at: Instant) {
    counter!("tilecast_render_total", "result" => kind).increment(1);
    warn!(
        target = "application::coordinator",
        op = "coordinator::render",
        result = "error",
        error_code = kind,
        scene,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        error = %detail,
        "Tile render failed"
    );
}

/// `outer: inner: innermost`, for logs and plain-text error bodies.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(inner) = current {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        current = inner.source();
    }
    message
}
