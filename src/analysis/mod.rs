//! Analysis stages.
//!
//! Stage output shapes, the multi-chunk aggregator, and the analyzers that
//! run each stage through the completion dispatcher.

pub mod aggregator;
pub mod analyzers;
pub mod stages;

pub use aggregator::{aggregate_outputs, combine_summaries, Aggregate};
pub use analyzers::StageRunner;
pub use stages::*;
