//! Nectar - 业务数据对话问答服务
//!
//! 把自然语言问题路由到合适的检索策略，组装检索上下文与多轮会话记忆，
//! 单次模型调用流式合成回答。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求编排与错误类型
//! - **intent**: 意图路由（问题 → 检索工具决策）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话缓存、历史管理与持久化
//! - **retrieval**: 检索工具集与向量检索接口
//! - **synth**: 流式 / 缓冲响应合成
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod retrieval;
pub mod synth;
