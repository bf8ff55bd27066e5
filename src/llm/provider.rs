//! 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
//!
//! DeepSeek 提供与 OpenAI 完全兼容的接口，复用 OpenAiClient，仅替换 base_url 与模型名。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端：优先 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
pub fn create_deepseek_client(model: Option<&str>, timeout_secs: u64) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, api_key.as_deref())
        .with_request_timeout(timeout_secs)
}

/// provider = mock 时强制 Mock；否则按 API Key 是否存在决定后端，均无则退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }

    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();
    let timeout = cfg.llm.timeouts.request;

    if has_deepseek_key || (provider == "deepseek" && has_openai_key) {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!(model = %model, "Using DeepSeek LLM");
        Arc::new(create_deepseek_client(Some(&model), timeout))
    } else if has_openai_key {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!(model = %model, "Using OpenAI LLM");
        Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None)
                .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}
