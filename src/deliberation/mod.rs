//! Deliberation orchestration.
//!
//! The request/result model, prompt assembly, transcript artifacts, and
//! the engine that runs the round loop.

mod engine;
pub mod prompts;
mod transcript;
mod types;

pub use engine::DeliberationEngine;
pub use transcript::TranscriptWriter;
pub use types::{
    DeliberateRequest, DeliberationResult, DeliberationStatus, Mode, Participant, RoundResponse,
    Stance,
};
