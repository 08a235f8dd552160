//! Core library for CastPilot: scheduling, platform adapters, and dispatch.
//!
//! This crate contains the Scheduling & Dispatch Engine, the Platform
//! Adapter Framework, and the Repost Governor, plus the supporting
//! components (clock/ids, encrypted secret store, token lifecycle, job
//! broker, persistence) they are built on. It has no knowledge of HTTP,
//! process entry points, or the frontend — those are owned by the binary
//! crate and the excluded collaborators described in the design docs.

pub mod broker;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod governor;
pub mod object_store;
pub mod platform;
pub mod scheduler;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod tokens;

pub use error::*;

/// Returns the version of the castpilot-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
