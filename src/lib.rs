//! CAPSIM — an agent-based discrete-event simulator of social interactions.
//!
//! The crate is organized one module per component named in the design
//! (`§2 SYSTEM OVERVIEW`): a priority-ordered event queue and clock drive a
//! single-threaded engine that dispatches agent actions and trend-influence
//! fan-out, buffering every mutation through a batched repository.

pub mod action;
pub mod agent;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod influence;
pub mod metrics;
pub mod repository;
pub mod trend;
pub mod types;
