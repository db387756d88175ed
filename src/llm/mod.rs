// LLM abstraction layer

pub mod provider;
pub mod openai;
pub mod google;
pub mod openrouter;

pub use provider::*;
