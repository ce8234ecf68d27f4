//! # Vigil Runtime
//!
//! Executes plans against bound agents, replans on failure and drift, and
//! exposes the process-wide engine.
//!
//! - [`Engine`] - plan, execute and spawn runs
//! - [`Agent`] - the contract agent implementations fulfil
//! - [`RuntimeConfig`] - timeouts, replan limits and search budget
//! - [`lifecycle`] - the process-wide engine slot

pub mod agent;
pub mod config;
pub mod engine;
pub mod executor;
pub mod lifecycle;
pub mod replanner;

pub use agent::{Agent, AgentContext, AgentOutcome, AgentSet, CancellationToken, FnAgent, ScriptedAgent};
pub use config::RuntimeConfig;
pub use engine::{Engine, EngineBuilder, RunController, RunHandle};
pub use executor::{DriftReport, Executor, RunControl, ABANDONED_LOG, PRECONDITION_LOG};
pub use replanner::Replanner;
