//! Turn runtime.
//!
//! Composes the store and the generation provider into chat turns:
//! - [`credits::CreditLedger`]: balance gating and subscription refresh
//! - [`compactor::HistoryCompactor`]: word-budget truncation + summarization
//! - [`graph_patch::GraphPatchEngine`]: snapshot mutation batches
//! - [`branch::BranchManager`]: conversation forking and access
//! - [`orchestrator::TurnOrchestrator`]: the turn pipeline itself

#![deny(unsafe_code)]

pub mod branch;
pub mod compactor;
pub mod credits;
pub mod errors;
pub mod graph_patch;
pub mod orchestrator;
pub mod prompts;

pub use branch::BranchManager;
pub use compactor::{CompactorConfig, HistoryCompactor};
pub use credits::CreditLedger;
pub use errors::{Result, RuntimeError};
pub use graph_patch::GraphPatchEngine;
pub use orchestrator::{TurnOrchestrator, TurnReply, TurnRequest};
