//! AI-assisted selector discovery
//!
//! When the configured selectors recover too few fields, a [`FieldProposer`]
//! asks a local model for new ones. Calls are gated by the thermal gate and
//! bounded by a timeout; every failure degrades to "no proposal".

mod inference;
mod proposer;

pub use inference::{InferenceClient, InferenceError, InferenceRequest, OllamaClient};
pub use proposer::{
    simplify_html, FieldProposal, FieldProposer, ProposalOutcome, ProposalPhase, ProposerStats,
};
