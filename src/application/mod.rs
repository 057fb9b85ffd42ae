//! Engine session handling and render coordination.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{
    CoordinatorSettings, RenderCoordinator, RenderError, RenderOutput, SessionSnapshot,
};
pub use engine::{EngineError, OutputFormat, RenderEngine, RenderSettings};
pub use session::EngineSession;
