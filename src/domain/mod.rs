//! Pure request and geometry types. Nothing in here touches the engine or the filesystem.

pub mod error;
pub mod request;
pub mod tile;

pub use error::DomainError;
pub use request::{Device, RenderPlan, RenderRequest};
pub use tile::{TileRect, TileSpec};
