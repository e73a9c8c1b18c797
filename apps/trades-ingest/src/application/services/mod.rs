//! Application Services
//!
//! - `ingestion`: the polling loop moving trades from source to publisher
//! - `lifecycle`: start/stop sequencing of the publisher and the loop task

pub mod ingestion;
pub mod lifecycle;

pub use ingestion::{
    IngestError, IngestionContext, IngestionLoop, IngestionReport, IngestionSettings, LoopExit,
    LoopState,
};
pub use lifecycle::{PipelineConfig, PipelineError, PipelineLifecycle, PipelineState, PipelineStatus};
