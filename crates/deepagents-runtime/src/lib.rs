//! HTTP clients for the deep agent runtime and the parsing service.
//!
//! Provides:
//! - `LangGraphClient` - `AgentRuntime` over HTTP and server-sent events
//! - `ParsingClient` - repository indexing and retrieval queries
//! - `Deployment` - where the runtime lives and which agent to run

pub mod deployment;
pub mod langgraph;
pub mod parsing;

pub use deployment::{ConfigError, Deployment};
pub use langgraph::LangGraphClient;
pub use parsing::{IndexProgress, ParsingClient, ParsingError, QueryResult, ServiceStatus};
