//! jmx-control - a session-oriented control plane for JMeter load tests
//!
//! This crate provides:
//! - Session tracking with a guarded run-state machine
//! - Engine process supervision (sanity and distributed runs)
//! - Equal load splitting across remote workers
//! - Live metrics aggregation from engine progress output
//! - Results retrieval (JTL, summary CSV, HTML dashboard archive)
//!
//! # Architecture
//!
//! The HTTP layer ([`api`]) is a thin shell over the [`orchestrator`], which
//! owns the [`session::SessionStore`] and the [`engine::Supervisor`]. Each
//! started session gets one supervision task that owns its engine processes
//! and publishes the terminal state; a metrics pump per session folds engine
//! output into the session's latest snapshot.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod session;
pub mod splitter;

pub use error::{ControlError, Result};
