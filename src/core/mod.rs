//! 核心层：请求编排与错误类型

pub mod error;
pub mod orchestrator;

pub use error::OrchestrationError;
pub use orchestrator::{
    create_history_store, create_llm_from_config, create_orchestrator, spawn_sweeper, Orchestrator,
};
