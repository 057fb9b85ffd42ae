use std::time::Instant;

use metrics::counter;
use tracing::{info, warn};

use crate::domain::Device;

use super::engine::{EngineError, RenderEngine, RenderSettings};

/// The engine plus what has been applied to it so far.
///
/// `loaded_file` and `active_device` only ever change after the engine accepted
/// the change, so on failure they keep describing the last state that held.
pub struct EngineSession {
    engine: Box<dyn RenderEngine>,
    loaded_file: Option<String>,
    active_device: Option<Device>,
}

impl EngineSession {
    pub fn new(engine: Box<dyn RenderEngine>) -> Self {
        Self {
            engine,
            loaded_file: None,
            active_device: None,
        }
    }

    pub fn loaded_file(&self) -> Option<&str> {
        self.loaded_file.as_deref()
    }

    pub fn active_device(&self) -> Option<Device> {
        self.active_device
    }

    /// Open `file` unless it is already the loaded scene. Returns whether the
    /// engine was asked to load.
    pub fn ensure_loaded(&mut self, file: &str) -> Result<bool, EngineError> {
        if self.loaded_file.as_deref() == Some(file) {
            return Ok(false);
        }

        let started_at = Instant::now();
        match self.engine.open_scene(file) {
            Ok(()) => {
                info!(
                    target = "application::session",
                    op = "session::ensure_loaded",
                    result = "loaded",
                    scene = file,
                    previous = self.loaded_file.as_deref().unwrap_or(""),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Scene opened"
                );
                counter!("tilecast_scene_load_total", "result" => "ok").increment(1);
                self.loaded_file = Some(file.to_string());
                Ok(true)
            }
            Err(err) => {
                warn!(
                    target = "application::session",
                    op = "session::ensure_loaded",
                    result = "error",
                    scene = file,
                    kept = self.loaded_file.as_deref().unwrap_or(""),
                    error = %err,
                    "Scene failed to open; keeping previous scene state"
                );
                counter!("tilecast_scene_load_total", "result" => "error").increment(1);
                Err(err)
            }
        }
    }

    /// Switch to `device` unless it is already active. Returns whether the
    /// engine was asked to switch.
    pub fn ensure_device(&mut self, device: Device) -> Result<bool, EngineError> {
        if self.active_device == Some(device) {
            return Ok(false);
        }

        match self.engine.set_acceleration_device(device) {
            Ok(()) => {
                info!(
                    target = "application::session",
                    op = "session::ensure_device",
                    result = "switched",
                    device = %device,
                    "Acceleration device configured"
                );
                counter!("tilecast_device_switch_total", "result" => "ok").increment(1);
                self.active_device = Some(device);
                Ok(true)
            }
            Err(err) => {
                warn!(
                    target = "application::session",
                    op = "session::ensure_device",
                    result = "error",
                    device = %device,
                    error = %err,
                    "Acceleration device switch failed"
                );
                counter!("tilecast_device_switch_total", "result" => "error").increment(1);
                Err(err)
            }
        }
    }

    pub fn render_still(&mut self, settings: &RenderSettings) -> Result<(), EngineError> {
        self.engine.render_still(settings)
    }
}
