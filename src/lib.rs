//! ADX match server library
//!
//! Exposes the staging area, the match pipeline and the HTTP server for the
//! binary and the integration tests.

pub mod config;
pub mod matching;
pub mod server;
pub mod staging;

pub use matching::{MatchCoordinator, MatchOutcome};
pub use server::{make_app, run_server, RequestsLoggingLevel};
pub use staging::StagingArea;
