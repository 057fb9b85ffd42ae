pub mod blender;
pub mod error;
pub mod http;
pub mod scenes;
pub mod telemetry;
