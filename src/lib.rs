//! tilecast: serve grid tiles of a Blender scene over HTTP.
//!
//! Requests name a scene, a square grid size and a tile index. The
//! [`application::RenderCoordinator`] turns the tile into a border rectangle,
//! keeps the engine's open scene and device in sync with the request, and renders
//! into a scratch file that is only handed out once complete.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
