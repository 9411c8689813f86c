pub mod config;
pub mod history;
pub mod protocol;
pub mod render;
pub mod result;
pub mod session;
pub mod tabs;
pub mod telemetry;
pub mod transport;
