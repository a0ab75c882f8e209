//! Core library for Refundwatch: portal automation, status extraction and
//! mapping, check orchestration, and the staleness alarm engine.

pub mod check;
pub mod domain;
pub mod error;
pub mod identity;
pub mod infra;
pub mod persistence;
pub mod portal;
pub mod types;

pub use check::{CheckConfig, CheckOrchestrator};
pub use error::{CoreError, Result};
