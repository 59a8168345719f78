// Storybench Infrastructure - Model Provider Adapters
// Implements: ModelClient over HTTP for OpenAI and Anthropic

mod anthropic;
mod client;
mod openai;

pub use client::{HttpModelClient, ProviderConfig};
