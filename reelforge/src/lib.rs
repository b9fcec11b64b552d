//! ReelForge - autonomous short-form video production pipeline
//!
//! This library turns approved content ideas from a spreadsheet-like dashboard
//! into published vertical videos. Items move through a fixed stage graph
//! (scripting, narration, clip sourcing, assembly, captioning, metadata,
//! publishing); every stage is resumable, every external call is mediated by
//! a resilient call layer, and every produced file goes through an atomic
//! artifact store.
//!
//! # High-Level API
//!
//! The [`supervisor`] module provides the top-level entry points:
//!
//! ```ignore
//! use reelforge::config::Settings;
//! use reelforge::supervisor::Supervisor;
//!
//! let settings = Settings::from_env()?;
//! let supervisor = Supervisor::bootstrap(settings).await?;
//!
//! // Single discovery pass, drain, and exit
//! supervisor.run_once(shutdown_token).await?;
//! ```

pub mod adapters;
pub mod config;
pub mod dashboard;
pub mod logging;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod resilience;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod validate;

/// Version of the ReelForge library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
