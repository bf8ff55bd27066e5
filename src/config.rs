//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LIUXUE__*` 覆盖（双下划线表示嵌套，如 `LIUXUE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
    pub memory: MemorySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 无法从消息判断语言时的默认语言（zh / en）
    pub default_locale: String,
    /// 送入模型的对话轮数
    pub max_context_turns: usize,
    /// prompt 覆盖目录，存在 <agent>.txt 时替换内置模板
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            default_locale: "zh".to_string(),
            max_context_turns: 10,
            prompts_dir: None,
        }
    }
}

/// [llm] 段：后端选择、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 设置后覆盖各 Agent 的默认温度
    pub temperature: Option<f32>,
    /// 设置后作为各 Agent max_tokens 的上限
    pub max_tokens: Option<u32>,
    /// 模型调用失败（超时 / 网络 / 未知错误）时的重试次数
    pub max_retries: u32,
    pub deepseek: LlmDeepSeekSection,
    pub openai: LlmOpenAiSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            temperature: None,
            max_tokens: None,
            max_retries: 1,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// 单轮执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// 有界的思考-工具循环
    React,
    /// Plan → Execute → Solve
    #[default]
    Workflow,
}

/// [orchestrator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_delegation_depth: usize,
    pub max_iterations: usize,
    pub fast_route_threshold: f32,
    pub execution_mode: ExecutionMode,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_delegation_depth: 3,
            max_iterations: 8,
            fast_route_threshold: 0.7,
            execution_mode: ExecutionMode::Workflow,
        }
    }
}

/// [tools] 段：超时、重试与熔断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 10,
            retry: RetrySection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
        }
    }
}

/// [tools.retry] 段（仅对幂等工具生效）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

/// [tools.circuit_breaker] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 30,
        }
    }
}

/// 会话存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [memory] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub backend: MemoryBackend,
    pub sqlite_path: PathBuf,
    /// 内存后端的会话过期时间（秒）
    pub session_ttl_secs: u64,
    /// 消息数超过该值后生成较早对话摘要
    pub summary_threshold: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::Memory,
            sqlite_path: PathBuf::from("data/conversations.db"),
            session_ttl_secs: 24 * 3600,
            summary_threshold: 40,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LIUXUE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LIUXUE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LIUXUE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
