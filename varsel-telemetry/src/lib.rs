//! # varsel-telemetry
//!
//! Logging, metrics recording and the read-only metrics HTTP surface for the
//! varsel workers.

pub mod logging;
pub mod metrics;
pub mod surface;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
pub use surface::{spawn_surface, SurfaceState};
