pub mod orchestrator;

pub use orchestrator::{CheckConfig, CheckOrchestrator};
