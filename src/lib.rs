// src/lib.rs
//
// =============================================================================
// PREPFLOW: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod config;
pub mod consumables;
pub mod core;
pub mod drivers;
pub mod error;
pub mod modules;
pub mod pipeline;
pub mod policy;
pub mod reagents;
pub mod session;
pub mod transcript;
pub mod waste;

// 2. Re-exports (The Public API)
// These allow `use prepflow::RunConfig` or `use prepflow::run` to work elsewhere.

pub use config::RunConfig;
pub use drivers::DeckDrivers;
pub use error::{ProtocolError, ProtocolResult};
pub use pipeline::stages::StageId;
pub use pipeline::{run, PipelineController, RunPlan};
pub use session::{RunReport, Session};
