//! Review scheduling for duckgate.
//!
//! Takes filtered, ranked review units from `duckgate-difflens`, consults the
//! semantic cache, collapses near-duplicates, packs the rest into batches and
//! dispatches them to an ordered chain of LLM backends with retry and
//! failover. [`pipeline::ReviewPipeline`] ties the stages together and
//! produces a [`outcome::ScanOutcome`].

pub mod backend;
pub mod batcher;
pub mod dedup;
pub mod llm;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod store;
