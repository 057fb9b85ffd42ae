#![deny(clippy::all, clippy::pedantic)]

use bytes::Bytes;
use reqwest::{Client, Response, Url, header::CONTENT_TYPE};
use thiserror::Error;
use tilecast::infra::scenes::SceneListing;

use crate::args::FetchArgs;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("server URL `{0}` cannot carry a path")]
    CannotBeABase(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("cannot stitch tiles: {0}")]
    Stitch(String),
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
}

impl Ctx {
    pub fn new(server: &str) -> Result<Self, CliError> {
        let base = Url::parse(server)?;
        if base.cannot_be_a_base() {
            return Err(CliError::CannotBeABase(server.to_string()));
        }
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("tilecast-cli/", env!("CARGO_PKG_VERSION"))
    }

    /// `segments` appended to the base path; an empty last segment keeps the trailing slash.
    pub fn url(&self, segments: &[&str]) -> Result<Url, CliError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| CliError::CannotBeABase(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn scenes(&self) -> Result<SceneListing, CliError> {
        let resp = self.client.get(self.url(&["render", ""])?).send().await?;
        let bytes = Self::success_body(resp).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CliError::Server(format!("failed to parse body: {e}")))
    }

    /// Fetch tile `n` of the grid described by `args`, as encoded image bytes.
    pub async fn tile(&self, args: &FetchArgs, n: u32) -> Result<Bytes, CliError> {
        let mut url = self.url(&["render", &args.file])?;
        {
            let mut qp = url.query_pairs_mut();
            for (key, value) in tile_query(args, n) {
                qp.append_pair(key, &value);
            }
        }

        let resp = self.client.get(url).send().await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = Self::success_body(resp).await?;
        if content_type.as_deref() != Some("image/png") {
            return Err(CliError::Server(format!(
                "tile {n}: expected image/png, got {}",
                content_type.as_deref().unwrap_or("no content type")
            )));
        }
        Ok(bytes)
    }

    async fn success_body(resp: Response) -> Result<Bytes, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(CliError::Server(format!("status {status} body {text}")));
        }
        Ok(bytes)
    }
}

pub fn tile_query(args: &FetchArgs, n: u32) -> Vec<(&'static str, String)> {
    let mut query = vec![("cols", args.cols.to_string()), ("n", n.to_string())];
    if let Some(device) = args.device.as_ref() {
        query.push(("cyclesDevice", device.clone()));
    }
    if let Some(x) = args.resolution_x {
        query.push(("resolutionX", x.to_string()));
    }
    if let Some(y) = args.resolution_y {
        query.push(("resolutionY", y.to_string()));
    }
    if let Some(percentage) = args.resolution_percentage {
        query.push(("resolutionPercentage", percentage.to_string()));
    }
    query
}
