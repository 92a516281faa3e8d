//! Runtime configuration shared across the RankTorch crates.
//!
//! Two concerns live here: deterministic-execution controls driven by
//! `RANKTORCH_*` environment variables, and global tracing-subscriber setup.
//! Library crates consult [`determinism`]; only binaries and test harnesses
//! should call [`tracing::init_tracing`].

pub mod determinism;
pub mod tracing;

pub use determinism::{config, DeterminismConfig};
pub use tracing::{init_tracing, InitError};
