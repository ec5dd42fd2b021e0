//! MatchLens - layered risk and insight analysis of dating-app conversations.
//!
//! The pipeline groups a flat message list into conversations, samples them
//! with a recency bias, splits the sample into token-bounded chunks, sends
//! each chunk to a completion model, merges the chunk results and decides,
//! stage by stage, whether a deeper evaluation is warranted. A separate
//! scorer classifies individual conversations as significant.

pub mod analysis;
pub mod chunker;
pub mod cli;
pub mod completion;
pub mod config;
pub mod cost;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod grouping;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod sampling;
pub mod significance;
