use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::infra::error::InfraError;

use super::coordinator::{RenderError, error_chain};

/// Diagnostic attached to failed responses and picked up by the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error response. The body is what the caller sees; the report is
/// what gets logged.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: String,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        body: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: body.into(),
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        body: impl Into<String>,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            body: body.into(),
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        const SOURCE: &str = "infra::http::render_error_to_http_error";

        let status = match &error {
            RenderError::InvalidRequest { .. } | RenderError::InvalidTileIndex { .. } => {
                StatusCode::BAD_REQUEST
            }
            RenderError::EngineLoadFailed { .. }
            | RenderError::EngineDeviceFailed { .. }
            | RenderError::RenderFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpError::from_error(SOURCE, status, error_chain(&error), &error)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
