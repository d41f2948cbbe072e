//! LLM provider plumbing: the uniform chat/stream interface, the static
//! provider registry with its model-name and parameter quirks, the generic
//! OpenAI-compatible HTTP adapter, and the tier-based model router.

pub mod http_provider;
pub mod registry;
pub mod router;
pub mod traits;

pub use http_provider::{create_provider, HttpProvider};
pub use router::{RouteDecision, Router, Tier};
pub use traits::{LlmProvider, LlmRequestConfig};
