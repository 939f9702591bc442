//! Levers — multi-armed bandit experimentation runtime.
//!
//! A recommender-side experimentation system:
//! - Policy engine (Thompson, epsilon-greedy, UCB1, control) with exact
//!   propensity accounting
//! - Deterministic user-to-policy assignment with sticky ramps
//! - Serve pipeline with deadlines, control fallback, and append-only
//!   event logging
//! - Windowed, idempotent reward attribution feeding online state updates
//! - Guardrail monitoring with auto-rollback
//! - IPS/DR decision engine and offline replay over SQLite storage

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
