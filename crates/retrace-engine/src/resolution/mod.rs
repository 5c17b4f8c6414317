//! Replay-time element resolution.
//!
//! `CandidateFinder` runs a bundle's strategies once; `Resolver` polls the finder,
//! scores and ranks what it returns, and decides between Found, Ambiguous and NotFound.

pub mod finder;
pub mod resolver;
pub mod scoring;

pub use finder::{CandidateFinder, FindOutcome};
pub use resolver::{DEFAULT_RESOLVE_TIMEOUT_MS, ResolveOptions, Resolver};
