use std::{process, sync::Arc};

use tilecast::{
    application::{CoordinatorSettings, RenderCoordinator, error::AppError},
    config::{self, RenderArgs},
    domain::RenderRequest,
    infra::{
        blender::BlenderEngine,
        error::InfraError,
        http::{self, HttpState},
        scenes::SceneCatalog,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

struct EngineContext {
    coordinator: Arc<RenderCoordinator>,
    scenes: Arc<SceneCatalog>,
}

async fn build_engine_context(settings: &config::EngineSettings) -> Result<EngineContext, AppError> {
    tokio::fs::create_dir_all(&settings.scratch_dir)
        .await
        .map_err(|err| InfraError::directory(&settings.scratch_dir, err))?;

    let scenes = SceneCatalog::new(&settings.scenes_dir, &settings.scene_extension);
    let engine = BlenderEngine::new(
        settings.blender_path.clone(),
        scenes.clone(),
        settings.available_devices.clone(),
    );
    let coordinator = RenderCoordinator::new(
        Box::new(engine),
        CoordinatorSettings {
            default_device: settings.default_device,
            threads: settings.threads.get(),
            scratch_dir: settings.scratch_dir.clone(),
        },
    );

    Ok(EngineContext {
        coordinator: Arc::new(coordinator),
        scenes: Arc::new(scenes),
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let engine = build_engine_context(&settings.engine).await?;

    let state = HttpState {
        renderer: engine.coordinator,
        scenes: engine.scenes,
        index_file: Arc::new(settings.server.index_file.clone()),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "tilecast::serve",
        addr = %settings.server.addr,
        scenes_dir = %settings.engine.scenes_dir.display(),
        default_device = %settings.engine.default_device,
        threads = settings.engine.threads.get(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "tilecast::serve", "Shutdown requested");
}

async fn run_render(settings: config::Settings, args: RenderArgs) -> Result<(), AppError> {
    let engine = build_engine_context(&settings.engine).await?;

    let mut request = RenderRequest::new(args.file).with_tile(args.cols, args.n);
    request.resolution_x = args.resolution_x;
    request.resolution_y = args.resolution_y;
    request.resolution_percentage = args.resolution_percentage;

    let coordinator = Arc::clone(&engine.coordinator);
    let output = tokio::task::spawn_blocking(move || coordinator.render(&request))
        .await
        .map_err(|err| AppError::unexpected(format!("render task aborted: {err}")))??;

    tokio::fs::copy(output.path(), &args.output)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "tilecast::render",
        output = %args.output.display(),
        bytes = output.byte_len(),
        "Tile written"
    );
    Ok(())
}
