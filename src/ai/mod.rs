//! AI reply drafting
//!
//! Generates sales replies from a message and its conversation using an
//! OpenAI-compatible chat completions endpoint, records each generated and
//! sent reply in the interaction log, and fine-tunes the drafting model on
//! the replies users actually sent.

mod client;
mod prompts;
mod reply;
mod training;

pub use client::{CompletionClient, FineTuneJob};
pub use reply::ReplyDrafter;
pub use training::FineTuner;
