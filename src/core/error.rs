//! 编排错误类型
//!
//! 只有合成与持久化失败会终止请求；路由与检索失败在各自组件内降级吸收，
//! 不会出现在这里。对外只给通用失败文案，细节走日志。

use thiserror::Error;

/// 一次问答请求的终止性错误
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// 生成调用失败；流式场景下已发出的分片不回收
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// 回答已生成但写入持久历史失败；answer 随错误一并交还调用方
    #[error("History persistence failed: {reason}")]
    Persistence { answer: String, reason: String },
}
