//! lockwatch-core — lock contention and deadlock monitoring engine.
//!
//! Provides:
//! - `collector` — lock/session snapshot sampling from a resource manager
//! - `analysis` — blocking resolution, impact scoring, deadlock detection,
//!   window analytics and recommendations
//! - `storage` — findings models, append-only findings store, retention,
//!   segment archive, string interner
//! - `engine` — per-tenant pass orchestration (`run_once`)
//! - `alert` — alert events and sinks
//! - `clock` — injected time source for deterministic runs
//! - `config` — engine thresholds and retention horizon
//! - `tenant` — tenant scoping of all derived findings

pub mod alert;
pub mod analysis;
pub mod clock;
pub mod collector;
pub mod config;
pub mod engine;
pub mod storage;
pub mod tenant;
