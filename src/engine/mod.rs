//! Core engine: the scan → size → place → settle loop and the bet
//! lifecycle it drives.

pub mod executor;
pub mod scanner;
pub mod settler;
pub mod tracker;
