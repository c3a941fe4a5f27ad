//! SHARPLINE: sports-betting edge detection and stake sizing.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod platforms;
pub mod storage;
pub mod strategy;
pub mod types;
