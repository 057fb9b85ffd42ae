//! HTTP surface: index page, scene listing, tile rendering.

mod middleware;
mod render;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use render::{HttpState, RenderQuery, build_router};
