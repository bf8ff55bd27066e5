//! 流式事件
//!
//! 编排器在后台任务中推进处理，通过无界通道推送 StreamEvent；EventStream 持有取消令牌的 DropGuard，
//! 调用方丢弃流（如客户端断开）即取消后台任务。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::agent::{AgentResponse, AgentType};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start {
        conversation_id: String,
        agent: AgentType,
    },
    /// 增量文本
    Content {
        agent: AgentType,
        content: String,
    },
    ToolStart {
        agent: AgentType,
        tool: String,
        tool_call_id: String,
    },
    ToolEnd {
        agent: AgentType,
        tool: String,
        tool_call_id: String,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentSwitch {
        from: AgentType,
        to: AgentType,
        task: String,
        depth: usize,
    },
    Done {
        response: AgentResponse,
    },
    Error {
        message: String,
        code: String,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Content { .. } => "content",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::AgentSwitch { .. } => "agent_switch",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

pub type EventSink = mpsc::UnboundedSender<StreamEvent>;

/// 推送事件；接收端已关闭时静默丢弃
pub fn send_event(sink: Option<&EventSink>, event: StreamEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}

/// 事件流：丢弃即取消生产者
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    _guard: DropGuard,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<StreamEvent>, guard: DropGuard) -> Self {
        Self { rx, _guard: guard }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_event_json_shape() {
        let ev = StreamEvent::ToolEnd {
            agent: AgentType::School,
            tool: "search_schools".into(),
            tool_call_id: "call_1".into(),
            success: true,
            duration_ms: 12,
            error: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_end");
        assert_eq!(v["toolCallId"], "call_1");
        assert_eq!(v["durationMs"], 12);
        assert!(v.get("error").is_none());
        assert_eq!(ev.kind(), "tool_end");
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_token() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx, token.clone().drop_guard());
        send_event(
            Some(&tx),
            StreamEvent::Error {
                message: "x".into(),
                code: "unknown".into(),
            },
        );
        assert_eq!(stream.next().await.map(|e| e.kind()), Some("error"));
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
        // 接收端关闭后发送不会 panic
        send_event(
            Some(&tx),
            StreamEvent::Error {
                message: "y".into(),
                code: "unknown".into(),
            },
        );
    }
}
