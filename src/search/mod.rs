//! Search Module
//!
//! Web search used by the research flows. SerpAPI is the only backend.

pub mod serpapi;

pub use serpapi::{SearchError, SerpApiClient, WebResult};
