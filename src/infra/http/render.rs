use std::{io, io::ErrorKind, path::PathBuf, str::FromStr, sync::Arc};

use async_stream::stream;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::Deserialize;
use tempfile::TempPath;
use tokio::{fs::File, io::AsyncReadExt};

use crate::{
    application::{
        coordinator::{RenderCoordinator, RenderError, RenderOutput},
        error::HttpError,
    },
    domain::{Device, RenderRequest},
    infra::scenes::SceneCatalog,
};

use super::middleware::{log_responses, set_request_context};

const CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_INDEX_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<RenderCoordinator>,
    pub scenes: Arc<SceneCatalog>,
    pub index_file: Arc<PathBuf>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/render/", get(list_scenes))
        .route("/render/{file}", get(render_tile))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Raw query string of `GET /render/{file}`. Values stay strings so a malformed
/// number is reported as a validation error naming the parameter.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderQuery {
    pub cycles_device: Option<String>,
    pub resolution_x: Option<String>,
    pub resolution_y: Option<String>,
    pub resolution_percentage: Option<String>,
    pub cols: Option<String>,
    pub n: Option<String>,
}

impl RenderQuery {
    pub fn into_request(self, file: String) -> Result<RenderRequest, RenderError> {
        let device = self
            .cycles_device
            .as_deref()
            .map(Device::from_str)
            .transpose()?;

        let mut request = RenderRequest::new(file);
        request.device = device;
        request.resolution_x = parse_int("resolutionX", self.resolution_x.as_deref())?;
        request.resolution_y = parse_int("resolutionY", self.resolution_y.as_deref())?;
        request.resolution_percentage = parse_int(
            "resolutionPercentage",
            self.resolution_percentage.as_deref(),
        )?;
        if let Some(cols) = parse_int("cols", self.cols.as_deref())? {
            request.grid_size = cols;
        }
        if let Some(n) = parse_int("n", self.n.as_deref())? {
            request.tile_index = n;
        }
        Ok(request)
    }
}

fn parse_int(name: &'static str, value: Option<&str>) -> Result<Option<i64>, RenderError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .map_err(|_| RenderError::InvalidRequest {
                    message: format!("{name} must be an integer, got `{raw}`"),
                })
        })
        .transpose()
}

async fn index(State(state): State<HttpState>) -> Response {
    const SOURCE: &str = "infra::http::index";

    let path = state.index_file.as_path();
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let content_type = mime_guess::from_path(path)
                .first_raw()
                .unwrap_or(FALLBACK_INDEX_CONTENT_TYPE);
            ([(CONTENT_TYPE, content_type)], contents).into_response()
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Not Found", &err).into_response()
        }
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to read index page",
            &err,
        )
        .into_response(),
    }
}

async fn list_scenes(State(state): State<HttpState>) -> Response {
    match state.scenes.list().await {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::list_scenes",
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to list scenes: {err}"),
            &err,
        )
        .into_response(),
    }
}

async fn render_tile(
    State(state): State<HttpState>,
    Path(file): Path<String>,
    query: Result<Query<RenderQuery>, QueryRejection>,
) -> Response {
    const SOURCE: &str = "infra::http::render_tile";

    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            let message = rejection.body_text();
            return HttpError::new(SOURCE, StatusCode::BAD_REQUEST, message.clone(), message)
                .into_response();
        }
    };

    let request = match query.into_request(file.clone()) {
        Ok(request) => request,
        Err(err) => return HttpError::from(state.renderer.reject(&file, err)).into_response(),
    };

    // The render blocks for as long as the engine takes, plus any time queued
    // behind other renders; keep it off the async workers.
    let renderer = Arc::clone(&state.renderer);
    match tokio::task::spawn_blocking(move || renderer.render(&request)).await {
        Ok(Ok(output)) => stream_output(output).await,
        Ok(Err(err)) => HttpError::from(err).into_response(),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "render task aborted",
            &err,
        )
        .into_response(),
    }
}

async fn not_found() -> Response {
    HttpError::new(
        "infra::http::not_found",
        StatusCode::NOT_FOUND,
        "Not Found",
        "no route matched",
    )
    .into_response()
}

/// Respond with the finished render. The status line only goes out once the
/// scratch file is open; the file is deleted when the body stream is dropped.
async fn stream_output(output: RenderOutput) -> Response {
    let file = match File::open(output.path()).await {
        Ok(file) => file,
        Err(err) => {
            return HttpError::from_error(
                "infra::http::stream_output",
                StatusCode::INTERNAL_SERVER_ERROR,
                "render output unavailable",
                &err,
            )
            .into_response();
        }
    };

    let content_type = output.content_type();
    let byte_len = output.byte_len();
    let body = Body::from_stream(scratch_stream(file, output.into_temp_path()));

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, byte_len)
        .header(CACHE_CONTROL, "no-store")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn scratch_stream(mut file: File, scratch: TempPath) -> impl Stream<Item = io::Result<Bytes>> {
    stream! {
        let _scratch = scratch;
        loop {
            let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);
            match file.read_buf(&mut chunk).await {
                Ok(0) => break,
                Ok(_) => yield Ok(chunk.freeze()),
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    }
}
