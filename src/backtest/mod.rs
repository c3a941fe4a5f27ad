//! Historical replay of the strategy pipeline.

pub mod cache;
pub mod runner;
