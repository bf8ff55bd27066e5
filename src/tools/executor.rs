//! 工具执行器
//!
//! execute(call, user_id, ctx)：
//! - delegate：按调用方 Agent 的委派白名单校验目标，返回委派标记，不触发任何 handler
//! - 其他工具：必须在调用方 Agent 的工具列表内；按 handler 类别分发，每次调用施加超时
//! - 只有超时与 Backend 错误算作故障：幂等工具按 RetryPolicy 重试，并计入该工具的熔断器；
//!   参数错误、查无此项等业务结果直接返回给模型
//! - 失败不抛出，统一落在 ToolExecutionResult.error；每次调用输出一行 JSON 审计日志

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::agent::{AgentType, Delegation};
use crate::core::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::core::AgentError;
use crate::memory::ToolCall;
use crate::tools::handlers::{ToolContext, ToolHandler};
use crate::tools::schema::{parse_args, DelegateArgs};
use crate::tools::{HandlerCategory, ToolRegistry, DELEGATE_TOOL};

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub delegation: Option<Delegation>,
}

impl ToolExecutionResult {
    fn ok(call: &ToolCall, data: Value, started: Instant) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            data: Some(data),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            delegation: None,
        }
    }

    fn failed(call: &ToolCall, error: impl Into<String>, started: Instant) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms: started.elapsed().as_millis() as u64,
            delegation: None,
        }
    }

    /// 写入 tool 消息的内容：成功为 {"success":true,"data":..}，失败为 {"success":false,"error":..}
    pub fn to_message_content(&self) -> String {
        let v = if self.success {
            json!({ "success": true, "data": self.data })
        } else {
            json!({ "success": false, "error": self.error })
        };
        v.to_string()
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    handlers: HashMap<HandlerCategory, Arc<dyn ToolHandler>>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, handlers: Vec<Arc<dyn ToolHandler>>) -> Self {
        Self {
            registry,
            handlers: handlers.into_iter().map(|h| (h.category(), h)).collect(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            breaker_config: CircuitBreakerConfig::default(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 注册表中每个非 agent 类别都必须有 handler
    pub fn check_handlers(&self) -> Result<(), AgentError> {
        for name in self.registry.tool_names() {
            if let Some(def) = self.registry.get(&name) {
                let cat = def.handler.category;
                if cat != HandlerCategory::Agent && !self.handlers.contains_key(&cat) {
                    return Err(AgentError::ConfigError(format!(
                        "no handler for category {} (tool {name})",
                        cat.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    fn breaker(&self, tool: &str) -> Option<Arc<CircuitBreaker>> {
        let mut map = self.breakers.lock().ok()?;
        Some(
            map.entry(tool.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.breaker_config.clone())))
                .clone(),
        )
    }

    pub async fn execute(&self, call: &ToolCall, user_id: &str, ctx: &ToolContext) -> ToolExecutionResult {
        let started = Instant::now();
        let (result, outcome, attempts) = if call.name == DELEGATE_TOOL {
            let r = self.delegate(call, ctx, started);
            let outcome = if r.success { "delegated" } else { "rejected" };
            (r, outcome, 1)
        } else {
            self.dispatch(call, user_id, ctx, started).await
        };

        let audit = json!({
            "event": "tool_audit",
            "tool": call.name,
            "agent": ctx.agent.as_str(),
            "ok": result.success,
            "outcome": outcome,
            "attempts": attempts,
            "duration_ms": result.duration_ms,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    fn delegate(&self, call: &ToolCall, ctx: &ToolContext, started: Instant) -> ToolExecutionResult {
        let args: DelegateArgs = match parse_args(&call.arguments) {
            Ok(a) => a,
            Err(e) => return ToolExecutionResult::failed(call, e.to_string(), started),
        };
        let allowed = ctx.agent.config();
        let target = match AgentType::parse(&args.target) {
            Some(t) if t != ctx.agent && allowed.can_delegate(t) => t,
            _ => {
                let err = AgentError::InvalidDelegation(format!(
                    "{} cannot delegate to {}",
                    ctx.agent, args.target
                ));
                return ToolExecutionResult::failed(call, err.to_string(), started);
            }
        };
        let delegation = Delegation {
            target,
            task: args.task,
            reason: args.reason.filter(|r| !r.is_empty()),
        };
        let mut r = ToolExecutionResult::ok(
            call,
            json!({ "delegated": true, "target": target, "task": delegation.task }),
            started,
        );
        r.delegation = Some(delegation);
        r
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        user_id: &str,
        ctx: &ToolContext,
        started: Instant,
    ) -> (ToolExecutionResult, &'static str, u32) {
        let Some(def) = self.registry.get(&call.name) else {
            let err = AgentError::HallucinatedTool(call.name.clone());
            return (ToolExecutionResult::failed(call, err.to_string(), started), "unknown_tool", 0);
        };
        if !ctx.agent.config().tools.contains(&call.name.as_str()) {
            let err = AgentError::ToolNotAllowed {
                tool: call.name.clone(),
                agent: ctx.agent,
            };
            return (ToolExecutionResult::failed(call, err.to_string(), started), "not_allowed", 0);
        }
        let Some(handler) = self.handlers.get(&def.handler.category) else {
            let err = AgentError::ToolExecutionFailed(format!("no handler for {}", def.handler));
            return (ToolExecutionResult::failed(call, err.to_string(), started), "error", 0);
        };
        let breaker = self.breaker(&call.name);
        if let Some(b) = &breaker {
            if !b.is_allowed() {
                let err = AgentError::CircuitOpen(call.name.clone());
                return (ToolExecutionResult::failed(call, err.to_string(), started), "circuit_open", 0);
            }
        }

        // 非幂等工具只执行一次
        let max_attempts = if def.idempotent { self.retry.max_retries + 1 } else { 1 };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = timeout(self.timeout, handler.call(def.handler.method, &call.arguments, user_id)).await;
            let (err, label) = match outcome {
                Ok(Ok(data)) => {
                    if let Some(b) = &breaker {
                        b.record_success();
                    }
                    return (ToolExecutionResult::ok(call, data, started), "ok", attempt);
                }
                Ok(Err(e)) if !e.is_transient() => {
                    return (ToolExecutionResult::failed(call, e.to_string(), started), e.label(), attempt);
                }
                Ok(Err(e)) => (AgentError::ToolExecutionFailed(e.to_string()), "error"),
                Err(_) => (AgentError::ToolTimeout(call.name.clone()), "timeout"),
            };
            if let Some(b) = &breaker {
                b.record_failure();
            }
            let breaker_open = breaker.as_ref().is_some_and(|b| !b.is_allowed());
            if attempt >= max_attempts || breaker_open {
                return (ToolExecutionResult::failed(call, err.to_string(), started), label, attempt);
            }
            let delay = self.retry.delay_for(attempt - 1);
            tracing::warn!(tool = %call.name, attempt, error = %err, delay_ms = delay.as_millis() as u64, "tool failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
