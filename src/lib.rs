pub mod config;
pub mod crds;
pub mod ctfd;
pub mod date_time;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod port_forward;
pub mod readiness;
pub mod reconciler;
pub mod resources;
pub mod sync;
pub mod telemetry;
pub mod utils;
