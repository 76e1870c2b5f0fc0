//! tagsync client
//!
//! Support code for applications embedding the tag cache: layered settings,
//! tracing and metrics initialisation, and a simulated monitoring session
//! used by the `tagsync-monitor` binary.

pub mod error;
pub mod metrics_setup;
pub mod session;
pub mod settings;
pub mod telemetry;

pub use error::{ClientError, Result};
pub use metrics_setup::init_metrics;
pub use session::{SessionReport, run_session};
pub use settings::{ClientSettings, ENV_PREFIX, SessionSettings};
pub use telemetry::init_tracing;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
