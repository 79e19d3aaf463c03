//! The running hub
//!
//! [`pipeline`] moves every raw broker message through normalization, storage
//! and broadcast. [`state`] is the query and command surface handed to the
//! routing layer, and [`hub_handle`] starts and stops the whole thing.

pub mod hub_handle;
pub mod pipeline;
pub mod state;

pub use hub_handle::{HubError, HubHandle};
pub use pipeline::{
    run_pipeline_loop, IngestPipeline, IngestState, Normalized, PipelineError, Recorded, Waiting,
};
pub use state::{HubState, HubStatus, LatestView, QueryError};
