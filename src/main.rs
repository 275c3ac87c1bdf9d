//! Nectar - 业务数据对话问答 CLI
//!
//! 入口：初始化日志、加载配置、内置演示数据索引，逐行读入问题并流式输出回答。

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use nectar::config::{load_config, AppConfig};
use nectar::core::{create_orchestrator, OrchestrationError};
use nectar::retrieval::{BusinessRecord, InMemoryVectorIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nectar::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let index = Arc::new(demo_index());
    let (orchestrator, sweep_token) = create_orchestrator(&cfg, index);

    let user_id = "local";
    let session_id = uuid::Uuid::new_v4().to_string();
    println!("Nectar 业务数据问答（输入 exit 退出，clear 清空会话）");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line.trim().to_string(),
            None => break,
        };
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        if line == "clear" {
            orchestrator
                .clear_conversation(user_id, &session_id)
                .await
                .context("Failed to clear conversation")?;
            println!("(会话已清空)");
            continue;
        }

        let (tx, mut rx) = mpsc::channel::<String>(16);
        let orch = orchestrator.clone();
        let question = line.clone();
        let session = session_id.clone();
        let request =
            tokio::spawn(
                async move { orch.handle_question(user_id, &session, &question, Some(tx)).await },
            );

        // 边到边打：分片按顺序落到 stdout
        while let Some(chunk) = rx.recv().await {
            stdout.write_all(chunk.as_bytes()).await?;
            stdout.flush().await?;
        }

        match request.await? {
            Ok(_) => {
                stdout.write_all(b"\n").await?;
            }
            Err(OrchestrationError::Persistence { reason, .. }) => {
                // 回答已输出；只提示历史可能不连贯
                stdout.write_all(b"\n").await?;
                tracing::error!("Persistence failed: {reason}");
                println!("(警告：本轮对话未能写入历史)");
            }
            Err(e) => {
                tracing::error!("Request failed: {e}");
                println!("(查询失败，请稍后重试)");
            }
        }
    }

    sweep_token.cancel();
    Ok(())
}

/// 内置演示数据：少量带元数据的业务记录
fn demo_index() -> InMemoryVectorIndex {
    let mut index = InMemoryVectorIndex::new();
    let records = [
        BusinessRecord::new(
            "rec-001",
            "华东区 2024 年二季度营收 1.2 亿元，同比增长 12%，主要来自企业订阅业务。",
        )
        .with_meta("category", "sales")
        .with_meta("region", "east")
        .with_meta("quarter", "2024Q2"),
        BusinessRecord::new(
            "rec-002",
            "华南区 2024 年二季度营收 0.8 亿元，同比下降 3%，渠道销售走弱。",
        )
        .with_meta("category", "sales")
        .with_meta("region", "south")
        .with_meta("quarter", "2024Q2"),
        BusinessRecord::new(
            "rec-003",
            "2024 年二季度市场费用 2100 万元，其中线上投放占六成。",
        )
        .with_meta("category", "expense")
        .with_meta("quarter", "2024Q2"),
        BusinessRecord::new(
            "rec-004",
            "Acme 公司年度合同续签率 92%，客单价提升 8%。",
        )
        .with_meta("category", "accounts")
        .with_meta("company", "acme"),
    ];
    for r in records {
        index.add(r);
    }
    index
}
