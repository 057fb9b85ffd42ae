use std::{
    collections::HashSet,
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{
        HeaderMap, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tilecast::{
    application::{
        CoordinatorSettings, EngineError, RenderCoordinator, RenderEngine, RenderSettings,
    },
    domain::{Device, TileRect},
    infra::{
        http::{HttpState, REQUEST_ID_HEADER, build_router},
        scenes::SceneCatalog,
    },
};
use tower::ServiceExt;

const TILE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake tile body";

#[derive(Debug, Clone)]
enum Call {
    Open(String),
    Device(Device),
    Render(RenderSettings),
}

#[derive(Clone, Default)]
struct EngineLog {
    calls: Arc<Mutex<Vec<Call>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl EngineLog {
    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn renders(&self) -> Vec<RenderSettings> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Render(settings) => Some(settings),
                _ => None,
            })
            .collect()
    }

    fn opens(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Open(_)))
            .count()
    }
}

/// Writes a fixed body for every render, or a truncated one followed by an error.
struct FakeEngine {
    engine_log: EngineLog,
    scenes: HashSet<String>,
    fail_render: bool,
    refuse_device: Option<Device>,
    delay: Duration,
}

impl RenderEngine for FakeEngine {
    fn open_scene(&mut self, scene: &str) -> Result<(), EngineError> {
        self.engine_log.record(Call::Open(scene.to_string()));
        if self.scenes.contains(scene) {
            Ok(())
        } else {
            Err(EngineError::SceneNotFound {
                scene: scene.to_string(),
            })
        }
    }

    fn set_acceleration_device(&mut self, device: Device) -> Result<(), EngineError> {
        self.engine_log.record(Call::Device(device));
        if self.refuse_device == Some(device) {
            return Err(EngineError::DeviceUnavailable { device });
        }
        Ok(())
    }

    fn render_still(&mut self, settings: &RenderSettings) -> Result<(), EngineError> {
        let active = self.engine_log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.engine_log.max_active.fetch_max(active, Ordering::SeqCst);
        self.engine_log.record(Call::Render(settings.clone()));
        thread::sleep(self.delay);

        let result = if self.fail_render {
            fs::write(&settings.output_path, &TILE_BYTES[..4])
                .map_err(EngineError::Scratch)
                .and(Err(EngineError::Process {
                    exit_code: Some(1),
                    stderr: "CUDA error: out of memory".to_string(),
                }))
        } else {
            fs::write(&settings.output_path, TILE_BYTES).map_err(EngineError::Scratch)
        };

        self.engine_log.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct Harness {
    router: Router,
    engine_log: EngineLog,
    scratch: TempDir,
    site: TempDir,
    _scenes: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_engine(false, Duration::ZERO)
    }

    fn with_engine(fail_render: bool, delay: Duration) -> Self {
        Self::build(fail_render, delay, None)
    }

    fn refusing_device(device: Device) -> Self {
        Self::build(false, Duration::ZERO, Some(device))
    }

    fn build(fail_render: bool, delay: Duration, refuse_device: Option<Device>) -> Self {
        let scenes_dir = TempDir::new().expect("scenes dir");
        for name in ["b.blend", "a.blend", "notes.txt"] {
            fs::write(scenes_dir.path().join(name), b"BLENDER-v400").expect("write scene");
        }
        let site = TempDir::new().expect("site dir");
        fs::write(site.path().join("index.html"), "<html>tiles</html>").expect("write index");
        let scratch = TempDir::new().expect("scratch dir");

        let engine_log = EngineLog::default();
        let engine = FakeEngine {
            engine_log: engine_log.clone(),
            scenes: ["a.blend", "b.blend"].into_iter().map(String::from).collect(),
            fail_render,
            refuse_device,
            delay,
        };
        let coordinator = RenderCoordinator::new(
            Box::new(engine),
            CoordinatorSettings {
                default_device: Device::Cpu,
                threads: 4,
                scratch_dir: scratch.path().to_path_buf(),
            },
        );
        let state = HttpState {
            renderer: Arc::new(coordinator),
            scenes: Arc::new(SceneCatalog::new(scenes_dir.path(), "blend")),
            index_file: Arc::new(site.path().join("index.html")),
        };

        Self {
            router: build_router(state),
            engine_log,
            scratch,
            site,
            _scenes: scenes_dir,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, headers, body)
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.scratch.path())
            .expect("read scratch")
            .next()
            .is_none()
    }
}

fn text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).into_owned()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn listing_returns_sorted_scene_files() {
    let harness = Harness::new();

    let (status, headers, body) = harness.get("/render/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "application/json");
    assert_eq!(text(&body), r#"{"files":["a.blend","b.blend"]}"#);
}

#[tokio::test]
async fn tile_is_streamed_as_png_and_scratch_removed() {
    let harness = Harness::new();

    let (status, headers, body) = harness.get("/render/a.blend?cols=3&n=4").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "image/png");
    assert_eq!(headers[CONTENT_LENGTH], TILE_BYTES.len().to_string().as_str());
    assert!(headers.contains_key(REQUEST_ID_HEADER));
    assert_eq!(body.as_ref(), TILE_BYTES);
    assert!(harness.scratch_is_empty());

    let renders = harness.engine_log.renders();
    assert_eq!(renders.len(), 1);
    let border = renders[0].border.expect("centre tile is cropped");
    assert_close(border.min_x, 1.0 / 3.0);
    assert_close(border.max_x, 2.0 / 3.0);
    assert_close(border.min_y, 1.0 / 3.0);
    assert_close(border.max_y, 2.0 / 3.0);
}

#[tokio::test]
async fn bottom_right_tile_of_two_by_two() {
    let harness = Harness::new();

    let (status, _, _) = harness.get("/render/a.blend?cols=2&n=3").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        harness.engine_log.renders()[0].border,
        Some(TileRect {
            min_x: 0.5,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 0.5,
        })
    );
}

#[tokio::test]
async fn missing_tile_parameters_render_the_full_frame() {
    let harness = Harness::new();

    let (status, _, _) = harness.get("/render/a.blend").await;

    assert_eq!(status, StatusCode::OK);
    let renders = harness.engine_log.renders();
    assert_eq!(renders[0].border, None);
    assert_eq!(renders[0].resolution_percentage, 100);
    assert!(renders[0].persistent_data);
    assert_eq!(renders[0].threads, 4);
}

#[tokio::test]
async fn out_of_range_tile_is_rejected_before_the_engine() {
    let harness = Harness::new();

    let (status, _, body) = harness.get("/render/a.blend?cols=3&n=9").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text(&body), "invalid tile index 9 (must be min: 0, max: 8)");

    let (status, _, _) = harness.get("/render/a.blend?cols=3&n=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = harness.get("/render/a.blend?cols=0&n=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(harness.engine_log.calls().is_empty());
}

#[tokio::test]
async fn malformed_parameters_are_bad_requests() {
    let harness = Harness::new();

    for uri in [
        "/render/a.blend?cols=three",
        "/render/a.blend?n=1.5",
        "/render/a.blend?resolutionX=wide",
        "/render/a.blend?resolutionPercentage=0",
        "/render/a.blend?cyclesDevice=METAL",
        "/render/..%2Fsecret.blend",
    ] {
        let (status, _, body) = harness.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {}", text(&body));
    }

    let (_, _, body) = harness.get("/render/a.blend?cols=three").await;
    assert!(text(&body).contains("cols must be an integer, got `three`"));
    assert!(harness.engine_log.calls().is_empty());
}

#[tokio::test]
async fn unknown_scene_is_a_server_error_with_diagnostic() {
    let harness = Harness::new();

    let (status, _, body) = harness.get("/render/missing.blend").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = text(&body);
    assert!(body.contains("failed to open scene `missing.blend`"), "{body}");
    assert!(body.contains("not found"), "{body}");
    assert!(harness.engine_log.renders().is_empty());
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn refused_device_is_a_server_error_without_render() {
    let harness = Harness::refusing_device(Device::Cuda);

    let (status, _, body) = harness.get("/render/a.blend?cyclesDevice=CUDA").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = text(&body);
    assert!(body.starts_with("failed to switch to device CUDA"), "{body}");
    assert!(body.contains("not available on this host"), "{body}");
    assert!(harness.engine_log.renders().is_empty());
    assert!(harness.scratch_is_empty());

    let (status, _, _) = harness.get("/render/a.blend").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.engine_log.renders().len(), 1);
}

#[tokio::test]
async fn failed_render_discards_partial_output() {
    let harness = Harness::with_engine(true, Duration::ZERO);

    let (status, _, body) = harness.get("/render/a.blend?cols=2&n=0").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = text(&body);
    assert!(body.starts_with("render failed"), "{body}");
    assert!(body.contains("CUDA error"), "{body}");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn scene_and_device_are_only_switched_when_they_change() {
    let harness = Harness::new();

    for uri in [
        "/render/a.blend?cols=2&n=0",
        "/render/a.blend?cols=2&n=1",
        "/render/a.blend?cols=2&n=2&cyclesDevice=cuda",
        "/render/b.blend?cols=2&n=3&cyclesDevice=CUDA",
    ] {
        let (status, _, _) = harness.get(uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }

    let calls = harness.engine_log.calls();
    let switches: Vec<String> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Open(scene) => Some(format!("open {scene}")),
            Call::Device(device) => Some(format!("device {device}")),
            Call::Render(_) => None,
        })
        .collect();
    assert_eq!(
        switches,
        vec!["open a.blend", "device CPU", "device CUDA", "open b.blend"]
    );
    assert_eq!(harness.engine_log.opens(), 2);
}

#[tokio::test]
async fn resolution_settings_do_not_leak_between_requests() {
    let harness = Harness::new();

    let (status, _, _) = harness
        .get("/render/a.blend?resolutionX=640&resolutionY=360&resolutionPercentage=25")
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = harness.get("/render/a.blend").await;
    assert_eq!(status, StatusCode::OK);

    let renders = harness.engine_log.renders();
    assert_eq!(renders[0].resolution_x, Some(640));
    assert_eq!(renders[0].resolution_y, Some(360));
    assert_eq!(renders[0].resolution_percentage, 25);
    assert_eq!(renders[1].resolution_x, None);
    assert_eq!(renders[1].resolution_y, None);
    assert_eq!(renders[1].resolution_percentage, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_overlap_in_the_engine() {
    let harness = Arc::new(Harness::with_engine(false, Duration::from_millis(40)));

    let mut handles = Vec::new();
    for n in 0..4 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            harness.get(&format!("/render/a.blend?cols=2&n={n}")).await
        }));
    }
    for handle in handles {
        let (status, _, body) = handle.await.expect("request task");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), TILE_BYTES);
    }

    assert_eq!(harness.engine_log.renders().len(), 4);
    assert_eq!(harness.engine_log.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(harness.engine_log.opens(), 1);
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn index_page_is_served_from_disk() {
    let harness = Harness::new();

    let (status, headers, body) = harness.get("/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .starts_with("text/html")
    );
    assert_eq!(text(&body), "<html>tiles</html>");
}

#[tokio::test]
async fn missing_index_page_is_not_found() {
    let harness = Harness::new();
    fs::remove_file(harness.site.path().join("index.html")).expect("remove index");

    let (status, _, _) = harness.get("/").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let harness = Harness::new();

    for uri in ["/favicon.ico", "/render/a.blend/extra", "/admin"] {
        let (status, _, _) = harness.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    assert!(harness.engine_log.calls().is_empty());
}
