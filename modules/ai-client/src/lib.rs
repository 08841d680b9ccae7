//! Thin client for OpenAI-compatible HTTP APIs.
//!
//! Only the two calls the generation pipeline needs are exposed: a single-turn
//! chat completion with sampling controls, and text embeddings.

pub mod error;
pub mod openai;
pub mod util;

pub use error::{AiError, Result};
pub use openai::{ChatOptions, OpenAi};
