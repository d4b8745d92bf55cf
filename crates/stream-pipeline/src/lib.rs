//! Stream Pipeline Orchestration
//!
//! Wires one camera stream end to end: camera service callback -> frame
//! router -> bounded queue -> renderer -> frame return, with the health
//! machine listening alongside. Front and rear cameras run two independent
//! instances of the same pipeline; nothing is shared across streams.

pub mod config;
pub mod pipeline;
pub mod redraw;
pub mod router;

pub use config::PipelineConfig;
pub use pipeline::{placeholder_image, StartOutcome, StreamPipeline};
pub use redraw::RedrawSignal;
pub use router::FrameRouter;

use evs_service::EvsError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required collaborator is missing; surfaced as a hard failure, never
    /// silently defaulted.
    #[error("not connected to the camera service")]
    NotConnected,

    #[error(transparent)]
    Service(#[from] EvsError),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),
}

/// Initialize logging
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}
