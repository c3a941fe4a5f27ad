//! Integration tests: mock collaborators and end-to-end simulations.

mod mock_platform;
mod simulation;
