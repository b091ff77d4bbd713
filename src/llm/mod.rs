//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for judge calls and the prompts
//! used by the three scoring metrics.

mod client;
mod prompts;

pub use client::{LlmClient, LlmResponse, Message, Role, TokenUsage};
pub use prompts::Prompts;
