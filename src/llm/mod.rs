//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{create_deepseek_client, OpenAiClient, TokenUsage};
pub use traits::{LlmClient, TokenStream};
