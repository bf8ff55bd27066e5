//! 编排器构建器：统一的初始化逻辑
//!
//! 进程启动时一次性选定各协作者（模型、业务存储、会话存储），未注入的按配置给出默认实现；
//! 构建时完成 Agent 配置与工具注册表的交叉校验，之后运行期不再做空值分支。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{
    validate_agent_configs, AgentDeps, AgentRunner, AgentType, ModelOverrides, PromptSet, TurnEngine, AGENT_CONFIGS,
};
use crate::config::{AppConfig, ExecutionMode, MemoryBackend};
use crate::core::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::core::{AgentError, Orchestrator};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{
    ConversationStore, InMemoryConversationStore, MemoryManager, MemorySettings, SqliteConversationStore,
};
use crate::routing::FastRouter;
use crate::store::{AdmissionsStore, InMemoryAdmissionsStore};
use crate::tools::{builtin_handlers, ToolExecutor, ToolRegistry};
use crate::workflow::WorkflowEngine;

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    admissions: Option<Arc<dyn AdmissionsStore>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    prompts_dir: Option<PathBuf>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        let prompts_dir = config.app.prompts_dir.clone();
        Self {
            config,
            llm: None,
            admissions: None,
            conversations: None,
            prompts_dir,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_admissions_store(mut self, store: Arc<dyn AdmissionsStore>) -> Self {
        self.admissions = Some(store);
        self
    }

    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let cfg = &self.config;

        let registry = ToolRegistry::with_builtin_tools()?;
        let warnings = validate_agent_configs(&AGENT_CONFIGS, &registry)?;
        tracing::debug!(tools = registry.tool_names().len(), warnings = warnings.len(), "agent configs validated");

        let admissions = self
            .admissions
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryAdmissionsStore::new()));
        let executor = ToolExecutor::new(Arc::new(registry), builtin_handlers(admissions.clone()))
            .with_timeout(Duration::from_secs(cfg.tools.tool_timeout_secs))
            .with_retry(RetryPolicy {
                max_retries: cfg.tools.retry.max_retries,
                initial_delay: Duration::from_millis(cfg.tools.retry.initial_delay_ms),
                max_delay: Duration::from_millis(cfg.tools.retry.max_delay_ms),
                multiplier: cfg.tools.retry.multiplier,
            })
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: cfg.tools.circuit_breaker.failure_threshold,
                success_threshold: cfg.tools.circuit_breaker.success_threshold,
                open_timeout: Duration::from_secs(cfg.tools.circuit_breaker.open_timeout_secs),
            });
        executor.check_handlers()?;

        let conversations = match self.conversations.clone() {
            Some(store) => store,
            None => conversation_store_from_config(cfg)?,
        };
        let memory = Arc::new(MemoryManager::new(
            conversations,
            admissions,
            MemorySettings {
                max_context_turns: cfg.app.max_context_turns,
                summary_threshold: cfg.memory.summary_threshold,
            },
        )?);

        let llm = self.llm.clone().unwrap_or_else(|| create_llm_from_config(cfg));
        let prompts = match self.prompts_dir.as_deref() {
            Some(dir) => load_prompt_overrides(dir)?,
            None => PromptSet::new(),
        };

        let deps = AgentDeps {
            llm,
            executor: Arc::new(executor),
            memory: memory.clone(),
            prompts: Arc::new(prompts),
            overrides: ModelOverrides {
                temperature: cfg.llm.temperature,
                max_tokens: cfg.llm.max_tokens,
            },
            model_retry: RetryPolicy {
                max_retries: cfg.llm.max_retries,
                ..RetryPolicy::default()
            },
        };
        let engine: Arc<dyn TurnEngine> = match cfg.orchestrator.execution_mode {
            ExecutionMode::React => {
                Arc::new(AgentRunner::new(deps).with_max_iterations(cfg.orchestrator.max_iterations))
            }
            ExecutionMode::Workflow => Arc::new(WorkflowEngine::new(deps)),
        };

        let router = FastRouter::with_default_rules(cfg.orchestrator.fast_route_threshold)
            .map_err(|e| AgentError::ConfigError(format!("routing rules: {e}")))?;

        tracing::info!(
            engine = engine.name(),
            memory = memory.backend_name(),
            max_delegation_depth = cfg.orchestrator.max_delegation_depth,
            "orchestrator ready"
        );
        Ok(Orchestrator::new(router, engine, memory)
            .with_max_delegation_depth(cfg.orchestrator.max_delegation_depth))
    }
}

fn conversation_store_from_config(cfg: &AppConfig) -> Result<Arc<dyn ConversationStore>, AgentError> {
    let store: Arc<dyn ConversationStore> = match cfg.memory.backend {
        MemoryBackend::Memory => {
            let store = Arc::new(InMemoryConversationStore::new(cfg.memory.session_ttl_secs));
            // 没有运行时（同步构建）时只依赖 create 时的顺带清理
            if tokio::runtime::Handle::try_current().is_ok() {
                store.spawn_cleanup(Duration::from_secs(cfg.memory.session_ttl_secs.clamp(1, 60)));
            }
            store
        }
        MemoryBackend::Sqlite => Arc::new(SqliteConversationStore::open(&cfg.memory.sqlite_path)?),
    };
    Ok(store)
}

/// 读取 <dir>/<agent>.txt 作为 prompt 覆盖；目录不存在时全部使用内置模板
pub fn load_prompt_overrides(dir: &Path) -> Result<PromptSet, AgentError> {
    let mut prompts = PromptSet::new();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "prompt dir not found, using built-in prompts");
        return Ok(prompts);
    }
    for agent in AgentType::ALL {
        let path = dir.join(format!("{}.txt", agent.as_str()));
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::ConfigError(format!("read {}: {e}", path.display())))?;
        if text.trim().is_empty() {
            continue;
        }
        tracing::info!(agent = %agent, path = %path.display(), "prompt override loaded");
        prompts = prompts.with_override(agent, text);
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_prompt_overrides_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("essay.txt"), "你是文书老师。").unwrap();
        std::fs::write(dir.path().join("school.txt"), "   ").unwrap();
        let prompts = load_prompt_overrides(dir.path()).unwrap();
        assert_eq!(prompts.template(AgentType::Essay), "你是文书老师。");
        assert_eq!(prompts.template(AgentType::School), AgentType::School.config().prompt_template);

        let missing = load_prompt_overrides(&dir.path().join("nope")).unwrap();
        assert_eq!(missing.template(AgentType::Case), AgentType::Case.config().prompt_template);
    }

    #[test]
    fn test_build_react_with_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.orchestrator.execution_mode = ExecutionMode::React;
        cfg.memory.backend = MemoryBackend::Sqlite;
        cfg.memory.sqlite_path = dir.path().join("db").join("conv.db");
        let orchestrator = OrchestratorBuilder::new(cfg)
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .unwrap();
        assert_eq!(orchestrator.engine_name(), "react");
        assert_eq!(orchestrator.memory().backend_name(), "sqlite");
    }

    #[test]
    fn test_memory_backend_builds_without_runtime() {
        let store = conversation_store_from_config(&AppConfig::default()).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_backend_inside_runtime() {
        let mut cfg = AppConfig::default();
        cfg.memory.session_ttl_secs = 1;
        let store = conversation_store_from_config(&cfg).unwrap();
        let state = crate::memory::ConversationState::new("u1", Some("c1"));
        store.create(&state).await.unwrap();
        assert!(store.get("c1").await.unwrap().is_some());
    }
}
