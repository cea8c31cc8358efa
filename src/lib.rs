//! Gated multi-agent pipelines.
//!
//! Remote LLM agents are chained into fixed stage sequences. Every model
//! output is parsed into a typed payload (or a recorded fallback), reviewed
//! by a supervising agent, and gated before anything is returned or acted on.
//!
//! # Modules
//!
//! - [`run`]: remote run execution, the [`run::RunController`] poll loop
//! - [`tools`]: closed set of tool kinds and their handlers
//! - [`providers`]: subject context and content-safety backends
//! - [`stage`]: stage contract, typed payloads and sequential orchestration
//! - [`quality`]: review gate and bounded retry loop
//! - [`actions`]: plan action publishing
//! - [`pipeline`]: the draft and two-gate interaction pipelines
//! - [`server`]: HTTP host

#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]

pub mod actions;
pub mod config;
pub mod pipeline;
pub mod providers;
pub mod quality;
pub mod run;
pub mod server;
pub mod stage;
pub mod telemetry;
pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
