//! Simulation agents: configuration, the chat-completions generation step,
//! paper ingestion, and the workflows the `sim-agents` binary exposes.

pub mod config;
pub mod ingest;
pub mod llm;
pub mod workflows;

pub use config::AgentConfig;
pub use llm::ChatCompletionsGenerator;
