//! In-memory engine double for unit tests.

use std::{
    collections::HashSet,
    fs,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::domain::Device;

use super::engine::{EngineError, RenderEngine, RenderSettings};

pub(crate) const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-tile";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineCall {
    Open(String),
    Device(Device),
    Render(RenderSettings),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<EngineCall>>>);

impl CallLog {
    fn push(&self, call: EngineCall) {
        self.0.lock().expect("call log").push(call);
    }

    pub(crate) fn take(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.0.lock().expect("call log"))
    }

    pub(crate) fn renders(&self) -> Vec<RenderSettings> {
        self.0
            .lock()
            .expect("call log")
            .iter()
            .filter_map(|call| match call {
                EngineCall::Render(settings) => Some(settings.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Succeed,
    /// Write half a file, then fail.
    FailPartial,
    /// Report success without writing anything.
    SucceedEmpty,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedEngine {
    calls: CallLog,
    broken_scenes: HashSet<String>,
    missing_devices: HashSet<Device>,
    outcome: Option<RenderOutcome>,
    delay: Duration,
    spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl ScriptedEngine {
    pub(crate) fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub(crate) fn spans(&self) -> Arc<Mutex<Vec<(Instant, Instant)>>> {
        Arc::clone(&self.spans)
    }

    pub(crate) fn failing_open(mut self, scene: &str) -> Self {
        self.broken_scenes.insert(scene.to_string());
        self
    }

    pub(crate) fn without_device(mut self, device: Device) -> Self {
        self.missing_devices.insert(device);
        self
    }

    pub(crate) fn with_outcome(mut self, outcome: RenderOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl RenderEngine for ScriptedEngine {
    fn open_scene(&mut self, scene: &str) -> Result<(), EngineError> {
        self.calls.push(EngineCall::Open(scene.to_string()));
        if self.broken_scenes.contains(scene) {
            return Err(EngineError::InvalidScene {
                scene: scene.to_string(),
                reason: "corrupt header".to_string(),
            });
        }
        Ok(())
    }

    fn set_acceleration_device(&mut self, device: Device) -> Result<(), EngineError> {
        self.calls.push(EngineCall::Device(device));
        if self.missing_devices.contains(&device) {
            return Err(EngineError::DeviceUnavailable { device });
        }
        Ok(())
    }

    fn render_still(&mut self, settings: &RenderSettings) -> Result<(), EngineError> {
        let started = Instant::now();
        self.calls.push(EngineCall::Render(settings.clone()));
        thread::sleep(self.delay);

        let result = match self.outcome.unwrap_or(RenderOutcome::Succeed) {
            RenderOutcome::Succeed => {
                fs::write(&settings.output_path, FAKE_PNG).map_err(EngineError::Scratch)
            }
            RenderOutcome::FailPartial => {
                fs::write(&settings.output_path, &FAKE_PNG[..4]).map_err(EngineError::Scratch)?;
                Err(EngineError::Process {
                    exit_code: Some(1),
                    stderr: "out of memory".to_string(),
                })
            }
            RenderOutcome::SucceedEmpty => Ok(()),
        };

        self.spans
            .lock()
            .expect("spans")
            .push((started, Instant::now()));
        result
    }
}
