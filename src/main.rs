//! liuxue 命令行对话
//!
//! 逐行读取标准输入并以流式事件输出回复。支持命令：
//! - `/agent <name> <message>`：跳过路由直接调用指定 Agent
//! - `/history`：查看当前会话历史
//! - `/clear`：清空当前会话
//! - `/quit`：退出

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use liuxue::agent::AgentType;
use liuxue::config::load_config;
use liuxue::core::{EventStream, OrchestratorBuilder, StreamEvent};

const CLI_USER: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liuxue::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .build()
            .context("Failed to build orchestrator")?,
    );

    println!("留学申请助手（{} 模式）。输入问题开始对话，/quit 退出。", orchestrator.engine_name());
    let mut conversation: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/history" => {
                let Some(id) = conversation.as_deref() else {
                    println!("（还没有对话）");
                    continue;
                };
                match orchestrator.get_history(CLI_USER, id, None).await {
                    Ok(messages) => {
                        for m in messages {
                            println!("[{}] {}", m.role.as_str(), m.content);
                        }
                    }
                    Err(e) => eprintln!("history failed: {e}"),
                }
                continue;
            }
            "/clear" => {
                if let Some(id) = conversation.take() {
                    if let Err(e) = orchestrator.clear_conversation(CLI_USER, &id).await {
                        eprintln!("clear failed: {e}");
                    }
                }
                println!("（会话已清空）");
                continue;
            }
            _ => {}
        }

        let events = match line.strip_prefix("/agent ") {
            Some(rest) => {
                let (name, message) = rest.split_once(' ').unwrap_or((rest, ""));
                let Some(agent) = AgentType::parse(name) else {
                    eprintln!("unknown agent: {name}");
                    continue;
                };
                orchestrator.call_agent_stream(CLI_USER, agent, message.trim(), conversation.clone())
            }
            None => orchestrator.handle_message_stream(CLI_USER, line, conversation.clone()),
        };
        if let Some(id) = render(events).await {
            conversation = Some(id);
        }
    }
    Ok(())
}

/// 打印事件，返回会话 ID
async fn render(mut events: EventStream) -> Option<String> {
    let mut conversation = None;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Start { conversation_id, agent } => {
                conversation = Some(conversation_id);
                print!("{}: ", agent.display_name());
            }
            StreamEvent::Content { content, .. } => print!("{content}"),
            StreamEvent::ToolStart { tool, .. } => print!("\n  [调用 {tool}]"),
            StreamEvent::ToolEnd {
                tool,
                success,
                duration_ms,
                error,
                ..
            } => {
                let status = if success { "ok".to_string() } else { error.unwrap_or_default() };
                println!(" [{tool} {status} {duration_ms}ms]");
            }
            StreamEvent::AgentSwitch { from, to, task, .. } => {
                print!("\n  [{} → {}：{task}]\n{}: ", from.display_name(), to.display_name(), to.display_name());
            }
            StreamEvent::Error { message, .. } => println!("\n{message}"),
            StreamEvent::Done { response } => {
                conversation = response.conversation_id.clone().or(conversation);
                println!();
                for s in &response.suggestions {
                    println!("  · {s}");
                }
            }
        }
        std::io::stdout().flush().ok();
    }
    conversation
}
