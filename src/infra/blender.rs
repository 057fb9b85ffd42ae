//! [`RenderEngine`] backed by a long-lived Blender process.
//!
//! One `blender --background` worker runs a small Python command loop
//! (`blender_worker.py`). Requests are JSON lines on its stdin; each request is
//! answered by exactly one stdout line starting with [`REPLY_PREFIX`]. Every
//! other stdout line is Blender's own progress output. The open scene stays
//! loaded between stills, so Cycles can keep its persistent data.
//!
//! When the worker dies it is dropped. The next request starts a fresh worker
//! and replays the scene and device this engine last confirmed.

use std::{
    fs,
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    application::{
        coordinator::error_chain,
        engine::{EngineError, RenderEngine, RenderSettings},
    },
    domain::Device,
    util::lock::mutex_lock,
};

use super::scenes::SceneCatalog;

const WORKER_SCRIPT: &str = include_str!("blender_worker.py");
const REPLY_PREFIX: &str = "@@tilecast ";
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    Open {
        path: &'a Path,
    },
    Device {
        device: &'static str,
    },
    Render {
        output_path: &'a Path,
        format: &'static str,
        threads: usize,
        persistent_data: bool,
        resolution_x: Option<u32>,
        resolution_y: Option<u32>,
        resolution_percentage: u32,
        /// `[min_x, max_x, min_y, max_y]` from the bottom-left corner.
        border: Option<[f64; 4]>,
    },
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// The command was delivered and answered; `Err` holds Blender's complaint.
type Reply = Result<(), String>;

fn parse_reply(text: &str) -> Result<Reply, EngineError> {
    let reply: WorkerReply = serde_json::from_str(text)
        .map_err(|err| EngineError::Protocol(format!("malformed reply `{text}`: {err}")))?;
    if reply.ok {
        Ok(Ok(()))
    } else {
        Ok(Err(reply
            .error
            .unwrap_or_else(|| "no reason given".to_string())))
    }
}

#[derive(Debug)]
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<String>>,
    stderr_reader: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(executable: &Path) -> Result<Self, EngineError> {
        let mut child = Command::new(executable)
            .arg("--background")
            .arg("-noaudio")
            .arg("--python-exit-code")
            .arg("1")
            .arg("--python-expr")
            .arg(WORKER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(EngineError::Spawn)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            kill_quietly(&mut child);
            return Err(EngineError::Protocol(
                "worker pipes were not captured".to_string(),
            ));
        };

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&stderr_tail);
        let stderr_reader = thread::Builder::new()
            .name("blender-stderr".to_string())
            .spawn(move || drain_stderr(stderr, &sink));
        let stderr_reader = match stderr_reader {
            Ok(handle) => handle,
            Err(err) => {
                kill_quietly(&mut child);
                return Err(EngineError::Spawn(err));
            }
        };

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_tail,
            stderr_reader: Some(stderr_reader),
        })
    }

    /// Send one request and wait for its reply line. An outer `Err` means the
    /// worker can no longer be used.
    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<Reply, EngineError> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| EngineError::Protocol(format!("unencodable request: {err}")))?;
        line.push('\n');

        if let Err(err) = self
            .stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
        {
            debug!(
                target = "infra::blender",
                op = "worker::call",
                error = %err,
                "Worker stdin closed"
            );
            return Err(self.exited());
        }

        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match self.stdout.read_until(b'\n', &mut buffer) {
                Ok(0) => return Err(self.exited()),
                Ok(_) => {}
                Err(err) => {
                    return Err(EngineError::Protocol(format!(
                        "failed to read worker output: {err}"
                    )));
                }
            }

            let text = String::from_utf8_lossy(&buffer);
            let text = text.trim_end();
            match text.strip_prefix(REPLY_PREFIX) {
                Some(reply) => return parse_reply(reply),
                None if text.is_empty() => {}
                None => debug!(target = "infra::blender", output = %text, "Blender"),
            }
        }
    }

    fn exited(&mut self) -> EngineError {
        let exit_code = self.child.wait().ok().and_then(|status| status.code());
        if let Some(reader) = self.stderr_reader.take()
            && reader.join().is_err()
        {
            warn!(
                target = "infra::blender",
                op = "worker::exited",
                "Blender stderr reader panicked"
            );
        }
        let stderr = mutex_lock(&self.stderr_tail, "infra::blender", "worker::exited")
            .trim()
            .to_string();
        EngineError::Process { exit_code, stderr }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            kill_quietly(&mut self.child);
        }
    }
}

fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.kill().and_then(|()| child.wait().map(drop)) {
        warn!(
            target = "infra::blender",
            op = "worker::kill",
            pid = child.id(),
            error = %err,
            "Failed to stop Blender worker"
        );
    }
}

fn drain_stderr(stderr: ChildStderr, sink: &Mutex<String>) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        let mut tail = mutex_lock(sink, "infra::blender", "worker::drain_stderr");
        push_tail(&mut tail, &line);
    }
}

/// Append `line`, keeping at most [`STDERR_TAIL_BYTES`] of the newest text.
fn push_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() <= STDERR_TAIL_BYTES {
        return;
    }
    let mut start = tail.len() - STDERR_TAIL_BYTES;
    while !tail.is_char_boundary(start) {
        start += 1;
    }
    tail.drain(..start);
}

#[derive(Debug, Clone)]
struct OpenScene {
    id: String,
    path: PathBuf,
}

#[derive(Debug)]
pub struct BlenderEngine {
    executable: PathBuf,
    catalog: SceneCatalog,
    available_devices: Vec<Device>,
    scene: Option<OpenScene>,
    device: Device,
    worker: Option<Worker>,
}

impl BlenderEngine {
    pub fn new(executable: PathBuf, catalog: SceneCatalog, available_devices: Vec<Device>) -> Self {
        Self {
            executable,
            catalog,
            available_devices,
            scene: None,
            device: Device::Cpu,
            worker: None,
        }
    }

    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<Reply, EngineError> {
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => self.start_worker()?,
        };
        let reply = worker.call(request)?;
        self.worker = Some(worker);
        Ok(reply)
    }

    fn start_worker(&self) -> Result<Worker, EngineError> {
        let started_at = Instant::now();
        let mut worker = Worker::spawn(&self.executable).inspect_err(|err| {
            warn!(
                target = "infra::blender",
                op = "blender::start_worker",
                result = "error",
                error_code = "spawn",
                executable = %self.executable.display(),
                error = %error_chain(err),
                "Failed to start Blender"
            );
        })?;

        if let Some(scene) = &self.scene {
            worker
                .call(&WorkerRequest::Open { path: &scene.path })?
                .map_err(|reason| EngineError::InvalidScene {
                    scene: scene.id.clone(),
                    reason,
                })?;
        }
        if self.device != Device::Cpu {
            worker
                .call(&WorkerRequest::Device {
                    device: self.device.as_str(),
                })?
                .map_err(|reason| EngineError::DeviceRejected {
                    device: self.device,
                    reason,
                })?;
        }

        info!(
            target = "infra::blender",
            op = "blender::start_worker",
            result = "ok",
            pid = worker.child.id(),
            scene = self.scene.as_ref().map(|scene| scene.id.as_str()).unwrap_or(""),
            device = %self.device,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Blender worker started"
        );
        Ok(worker)
    }
}

impl RenderEngine for BlenderEngine {
    fn open_scene(&mut self, scene: &str) -> Result<(), EngineError> {
        let not_found = || EngineError::SceneNotFound {
            scene: scene.to_string(),
        };
        let path = self.catalog.resolve(scene).ok_or_else(not_found)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(source) => {
                return Err(EngineError::SceneRead {
                    scene: scene.to_string(),
                    source,
                });
            }
        }

        let started_at = Instant::now();
        if let Err(reason) = self.call(&WorkerRequest::Open { path: &path })? {
            warn!(
                target = "infra::blender",
                op = "blender::open_scene",
                result = "error",
                error_code = "invalid_scene",
                scene,
                reason = %reason,
                "Blender could not open scene"
            );
            return Err(EngineError::InvalidScene {
                scene: scene.to_string(),
                reason,
            });
        }

        info!(
            target = "infra::blender",
            op = "blender::open_scene",
            result = "ok",
            scene,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Scene opened"
        );
        self.scene = Some(OpenScene {
            id: scene.to_string(),
            path,
        });
        Ok(())
    }

    fn set_acceleration_device(&mut self, device: Device) -> Result<(), EngineError> {
        if !self.available_devices.contains(&device) {
            return Err(EngineError::DeviceUnavailable { device });
        }
        let request = WorkerRequest::Device {
            device: device.as_str(),
        };
        if let Err(reason) = self.call(&request)? {
            return Err(EngineError::DeviceRejected { device, reason });
        }
        self.device = device;
        Ok(())
    }

    fn render_still(&mut self, settings: &RenderSettings) -> Result<(), EngineError> {
        let scene = self
            .scene
            .as_ref()
            .map(|scene| scene.id.clone())
            .ok_or(EngineError::NoScene)?;
        let started_at = Instant::now();

        let request = WorkerRequest::Render {
            output_path: &settings.output_path,
            format: settings.format.blender_name(),
            threads: settings.threads,
            persistent_data: settings.persistent_data,
            resolution_x: settings.resolution_x,
            resolution_y: settings.resolution_y,
            resolution_percentage: settings.resolution_percentage,
            border: settings
                .border
                .map(|rect| [rect.min_x, rect.max_x, rect.min_y, rect.max_y]),
        };

        let outcome = match self.call(&request) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(EngineError::RenderRejected { reason }),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(
                target = "infra::blender",
                op = "blender::render_still",
                result = "error",
                error_code = "blender_render",
                scene = %scene,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %error_chain(err),
                "Blender render failed"
            );
            return outcome;
        }

        info!(
            target = "infra::blender",
            op = "blender::render_still",
            result = "ok",
            scene = %scene,
            device = %self.device,
            bordered = settings.border.is_some(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output = %settings.output_path.display(),
            "Blender render finished"
        );
        Ok(())
    }
}
