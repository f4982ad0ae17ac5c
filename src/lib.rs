//! Slipway coordinates multi-repository software releases.
//!
//! Development work ("iterations") attaches to a time-boxed release window;
//! the engine validates branch naming, derives release version numbers, and
//! drives an ordered sequence of Git operations (merge, tag, archive) across
//! many repositories, tracking per-step outcomes and supporting retry of
//! failed units.
//!
//! The crate is the orchestration core only. Persistence, HTTP routing,
//! authentication and presentation are external layers: they consume
//! [`service::ReleaseService`] and implement the narrow traits in [`store`]
//! and [`hosting`].
//!
//! # Overview
//!
//! - [`window`] — release-window lifecycle state machine
//! - [`iteration`] — iterations and their window attachments
//! - [`compliance`] — branch-naming rules and the allow/block engine
//! - [`version`] — version policies (semver/date derivation and validation)
//! - [`hosting`] — the Git hosting port plus git2 and GitLab adapters
//! - [`run`] — run records, tasks, planning, bounded-parallel execution,
//!   export
//! - [`store`] — persistence trait boundary with in-memory reference
//!   implementations
//! - [`service`] — the operations facade callers drive

pub mod clock;
pub mod compliance;
pub mod errors;
pub mod hosting;
pub mod iteration;
pub mod run;
pub mod service;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod version;
pub mod window;

pub use errors::{CoreError, HostingError, Result};
