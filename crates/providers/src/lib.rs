//! LLM providers and the search backend for Glimpse.
//!
//! Chat providers implement `glimpse_core::Provider`; the search backend
//! implements `glimpse_core::SearchBackend`. The router builds both from
//! configuration.

pub mod anthropic;
pub mod openai_compat;
pub mod router;
mod sse;
pub mod valyu;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_selection, build_search};
pub use valyu::ValyuSearch;
